use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::backend::{Backend, Execution};
use crate::builtins::BuiltinFunction;
use crate::value::{FunctionValue, RuntimeError, Value};

/// One activation record. Name lookup walks the frame stack from the top;
/// writes always bind in the top frame.
#[derive(Debug, Default)]
struct Frame {
    scope: HashMap<String, Value>,
}

/// Control-flow result of evaluating a node: either a plain value or a
/// `return` travelling up to the nearest call boundary.
enum Flow {
    Value(Value),
    Return(Value),
}

/// Tree-walking evaluator. State persists across `eval_toplevel` calls,
/// which is what keeps REPL bindings alive between submissions.
pub struct Evaluator {
    frames: Vec<Frame>,
    output: Vec<String>,
}

impl Evaluator {
    pub fn new() -> Self {
        let mut globals = Frame::default();
        for builtin in [BuiltinFunction::Print, BuiltinFunction::Length] {
            globals
                .scope
                .insert(builtin.name().to_string(), Value::Builtin(builtin));
        }
        Self {
            frames: vec![globals],
            output: Vec::new(),
        }
    }

    /// Evaluate a whole program; the result is the last statement's value.
    pub fn eval_program(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let mut last = Value::Nil;
        for node in &program.statements {
            last = self.eval_toplevel(node)?;
        }
        Ok(last)
    }

    pub fn eval_toplevel(&mut self, node: &Node) -> Result<Value, RuntimeError> {
        match self.eval(node)? {
            Flow::Value(value) => Ok(value),
            Flow::Return(_) => Err(RuntimeError::ReturnOutsideFunction),
        }
    }

    /// Drain everything `print` produced since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn eval(&mut self, node: &Node) -> Result<Flow, RuntimeError> {
        match &node.kind {
            NodeKind::Int(value) => Ok(Flow::Value(Value::Int(*value))),
            NodeKind::Float(value) => Ok(Flow::Value(Value::Float(*value))),
            NodeKind::Str(value) => Ok(Flow::Value(Value::Str(value.clone()))),
            NodeKind::Bool(value) => Ok(Flow::Value(Value::Bool(*value))),
            NodeKind::Nil => Ok(Flow::Value(Value::Nil)),
            NodeKind::Ident(name) => match self.lookup(name) {
                Some(value) => Ok(Flow::Value(value)),
                None => Err(RuntimeError::UndefinedVariable { name: name.clone() }),
            },
            NodeKind::Array(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match self.eval(element)? {
                        Flow::Value(value) => values.push(value),
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Value(Value::Array(values)))
            }
            NodeKind::Infix { op, left, right } => {
                let left = match self.eval(left)? {
                    Flow::Value(value) => value,
                    flow => return Ok(flow),
                };
                let right = match self.eval(right)? {
                    Flow::Value(value) => value,
                    flow => return Ok(flow),
                };
                Ok(Flow::Value(left.binary(*op, &right)?))
            }
            NodeKind::Assign { name, value } => {
                let value = match self.eval(value)? {
                    Flow::Value(value) => value,
                    flow => return Ok(flow),
                };
                self.bind(name.clone(), value);
                Ok(Flow::Value(Value::Nil))
            }
            NodeKind::Increment(name) => self.step(name, 1),
            NodeKind::Decrement(name) => self.step(name, -1),
            NodeKind::If {
                condition,
                consequence,
                alternative,
            } => {
                let condition = match self.eval(condition)? {
                    Flow::Value(value) => value,
                    flow => return Ok(flow),
                };
                if condition.is_truthy() {
                    self.eval_block(consequence)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative)
                } else {
                    Ok(Flow::Value(Value::Nil))
                }
            }
            NodeKind::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    match self.eval(init)? {
                        Flow::Value(_) => {}
                        flow => return Ok(flow),
                    }
                }
                loop {
                    let keep_going = match condition {
                        Some(condition) => match self.eval(condition)? {
                            Flow::Value(value) => value.is_truthy(),
                            flow => return Ok(flow),
                        },
                        None => true,
                    };
                    if !keep_going {
                        break;
                    }
                    match self.eval_block(body)? {
                        Flow::Value(_) => {}
                        flow => return Ok(flow),
                    }
                    if let Some(update) = update {
                        match self.eval(update)? {
                            Flow::Value(_) => {}
                            flow => return Ok(flow),
                        }
                    }
                }
                Ok(Flow::Value(Value::Nil))
            }
            NodeKind::Function { name, params, body } => {
                let function = FunctionValue {
                    name: name.clone(),
                    params: params.clone(),
                    body: body.clone(),
                };
                self.bind(name.clone(), Value::Function(Rc::new(function)));
                Ok(Flow::Value(Value::Nil))
            }
            NodeKind::Call { name, args } => self.eval_call(name, args),
            NodeKind::Return(value) => {
                let value = match value {
                    Some(value) => match self.eval(value)? {
                        Flow::Value(value) => value,
                        flow => return Ok(flow),
                    },
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }
        }
    }

    fn eval_block(&mut self, nodes: &[Node]) -> Result<Flow, RuntimeError> {
        let mut last = Value::Nil;
        for node in nodes {
            match self.eval(node)? {
                Flow::Value(value) => last = value,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Value(last))
    }

    fn eval_call(&mut self, name: &str, args: &[Node]) -> Result<Flow, RuntimeError> {
        let callee = self
            .lookup(name)
            .ok_or_else(|| RuntimeError::UndefinedFunction {
                name: name.to_string(),
            })?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match self.eval(arg)? {
                Flow::Value(value) => values.push(value),
                flow => return Ok(flow),
            }
        }

        match callee {
            Value::Builtin(builtin) => {
                Ok(Flow::Value(builtin.call(values, &mut self.output)?))
            }
            Value::Function(function) => {
                if values.len() != function.params.len() {
                    return Err(RuntimeError::ArityMismatch {
                        name: function.name.clone(),
                        expected: function.params.len(),
                        found: values.len(),
                    });
                }
                let mut frame = Frame::default();
                for (param, value) in function.params.iter().zip(values) {
                    frame.scope.insert(param.clone(), value);
                }
                self.frames.push(frame);
                let result = self.eval_block(&function.body);
                self.frames.pop();
                match result? {
                    Flow::Return(value) => Ok(Flow::Value(value)),
                    // A body that somehow falls off the end yields nil.
                    Flow::Value(_) => Ok(Flow::Value(Value::Nil)),
                }
            }
            other => Err(RuntimeError::NotCallable {
                name: name.to_string(),
                type_name: other.type_name(),
            }),
        }
    }

    /// `name++` / `name--` behave as `name = name +/- 1`.
    fn step(&mut self, name: &str, delta: i64) -> Result<Flow, RuntimeError> {
        let current = self
            .lookup(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: name.to_string(),
            })?;
        let op = if delta > 0 { BinaryOp::Add } else { BinaryOp::Sub };
        let next = current.binary(op, &Value::Int(1))?;
        self.bind(name.to_string(), next);
        Ok(Flow::Value(Value::Nil))
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.scope.get(name))
            .cloned()
    }

    fn bind(&mut self, name: String, value: Value) {
        self.frames
            .last_mut()
            .expect("call stack always has a global frame")
            .scope
            .insert(name, value);
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.frames.len()
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// AST-walking backend: a fresh evaluator per run.
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn run(&mut self, program: &Program) -> Result<Execution, RuntimeError> {
        let mut evaluator = Evaluator::new();
        let value = evaluator.eval_program(program)?;
        Ok(Execution::new(value, evaluator.take_output()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use indoc::indoc;

    fn eval(source: &str) -> (Value, Vec<String>) {
        let program = parse_source(source).expect("parse should succeed");
        let mut evaluator = Evaluator::new();
        let value = evaluator
            .eval_program(&program)
            .expect("evaluation should succeed");
        (value, evaluator.take_output())
    }

    fn eval_err(source: &str) -> RuntimeError {
        let program = parse_source(source).expect("parse should succeed");
        Evaluator::new()
            .eval_program(&program)
            .expect_err("expected runtime failure")
    }

    #[test]
    fn increment_updates_binding_and_yields_nil() {
        let (value, _) = eval("i = 0\ni++");
        assert_eq!(value, Value::Nil);
        let (value, _) = eval("i = 0\ni++\ni");
        assert_eq!(value, Value::Int(1));
    }

    #[test]
    fn for_loop_accumulates_into_outer_binding() {
        let (value, _) = eval(indoc! {"
            sum = 0
            for i = 0; i < 10; i = i + 1 { sum = sum + i }
            sum
        "});
        assert_eq!(value, Value::Int(45));
    }

    #[test]
    fn function_call_returns_value() {
        let (value, _) = eval("func add(a, b) { return a + b }\nadd(5, 10)");
        assert_eq!(value, Value::Int(15));
    }

    #[test]
    fn recursion() {
        let (value, _) = eval(indoc! {"
            func fact(n) {
                if n < 2 { return 1 }
                return n * fact(n - 1)
            }
            fact(5)
        "});
        assert_eq!(value, Value::Int(120));
    }

    #[test]
    fn print_writes_space_separated_line() {
        let (value, output) = eval("print(\"hello\", 42)");
        assert_eq!(value, Value::Nil);
        assert_eq!(output, vec!["hello 42".to_string()]);
    }

    #[test]
    fn array_concatenation() {
        let (value, _) = eval("a = [1, 2, 3]\nb = [4, 5]\na + b");
        assert_eq!(
            value,
            Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(4),
                Value::Int(5),
            ])
        );
    }

    #[test]
    fn condition_only_for_behaves_like_while() {
        let (value, _) = eval("i = 0\nfor i < 5 { i = i + 1 }\ni");
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn if_else_picks_branches_by_truthiness() {
        let (value, _) = eval("if 1 { \"yes\" } else { \"no\" }");
        assert_eq!(value, Value::Str("yes".to_string()));
        let (value, _) = eval("if \"\" { \"yes\" } else { \"no\" }");
        assert_eq!(value, Value::Str("no".to_string()));
        let (value, _) = eval("if false { 1 }");
        assert_eq!(value, Value::Nil);
    }

    #[test]
    fn return_propagates_through_nested_blocks() {
        let (value, _) = eval(indoc! {"
            func classify(n) {
                for i = 0; i < 10; i = i + 1 {
                    if i == n { return \"found\" }
                }
                return \"missing\"
            }
            classify(3)
        "});
        assert_eq!(value, Value::Str("found".to_string()));
    }

    #[test]
    fn functions_see_caller_bindings_through_the_frame_chain() {
        let (_, output) = eval(indoc! {"
            func show() { print(hidden) }
            func caller() {
                hidden = 5
                show()
                return nilish
            }
            nilish = 0
            caller()
        "});
        assert_eq!(output, vec!["5".to_string()]);
    }

    #[test]
    fn assignment_yields_nil() {
        let (value, _) = eval("x = 41");
        assert_eq!(value, Value::Nil);
    }

    #[test]
    fn call_restores_stack_depth() {
        let program = parse_source("func f(n) { return n }\nf(1)").expect("parse should succeed");
        let mut evaluator = Evaluator::new();
        let before = evaluator.depth();
        evaluator
            .eval_program(&program)
            .expect("evaluation should succeed");
        assert_eq!(evaluator.depth(), before);
    }

    #[test]
    fn stack_depth_restored_on_error_inside_call() {
        let program =
            parse_source("func f() { return 1 / 0 }\nf()").expect("parse should succeed");
        let mut evaluator = Evaluator::new();
        let before = evaluator.depth();
        let err = evaluator
            .eval_program(&program)
            .expect_err("expected division by zero");
        assert_eq!(err, RuntimeError::DivisionByZero);
        assert_eq!(evaluator.depth(), before);
    }

    #[test]
    fn undefined_variable_reports_name() {
        assert_eq!(
            eval_err("missing"),
            RuntimeError::UndefinedVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn undefined_function_reports_name() {
        assert_eq!(
            eval_err("nope(1)"),
            RuntimeError::UndefinedFunction {
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn arity_mismatch() {
        assert_eq!(
            eval_err("func two(a, b) { return a }\ntwo(1)"),
            RuntimeError::ArityMismatch {
                name: "two".to_string(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn calling_a_plain_value_fails() {
        assert_eq!(
            eval_err("x = 1\nx(2)"),
            RuntimeError::NotCallable {
                name: "x".to_string(),
                type_name: "integer"
            }
        );
    }

    #[test]
    fn top_level_return_is_an_error() {
        assert_eq!(eval_err("return 5"), RuntimeError::ReturnOutsideFunction);
    }

    #[test]
    fn bindings_persist_across_submissions() {
        let mut evaluator = Evaluator::new();
        let first = parse_source("x = 2").expect("parse should succeed");
        evaluator
            .eval_program(&first)
            .expect("evaluation should succeed");
        let second = parse_source("x * 21").expect("parse should succeed");
        assert_eq!(evaluator.eval_program(&second), Ok(Value::Int(42)));
    }

    #[test]
    fn state_survives_runtime_errors() {
        let mut evaluator = Evaluator::new();
        let first = parse_source("x = 2").expect("parse should succeed");
        evaluator
            .eval_program(&first)
            .expect("evaluation should succeed");
        let bad = parse_source("x / 0").expect("parse should succeed");
        assert!(evaluator.eval_program(&bad).is_err());
        let again = parse_source("x").expect("parse should succeed");
        assert_eq!(evaluator.eval_program(&again), Ok(Value::Int(2)));
    }

    #[test]
    fn length_builtin_is_a_stub() {
        let (value, _) = eval("length([1, 2, 3])");
        assert_eq!(value, Value::Nil);
    }
}
