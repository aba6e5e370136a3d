use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, Node, NodeKind, Program};
use crate::token::Span;
use crate::value::Value;

/// Stack machine instruction set. Jump offsets are measured from the
/// index of the jump instruction itself and may be negative.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Push(Value),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    /// Pops value then name string, writes `scope[name] = value`.
    Assign,
    Get(String),
    Call(String),
    StoreFunc(Rc<CompiledFunction>),
    Return,
    Pop,
    Jump(isize),
    JumpIfFalse(isize),
    JumpIfTrue(isize),
    CreateArray(usize),
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Push(value) => write!(f, "Push {value}"),
            Op::Add => f.write_str("Add"),
            Op::Sub => f.write_str("Sub"),
            Op::Mul => f.write_str("Mul"),
            Op::Div => f.write_str("Div"),
            Op::Rem => f.write_str("Rem"),
            Op::Eq => f.write_str("Eq"),
            Op::NotEq => f.write_str("NotEq"),
            Op::Gt => f.write_str("Gt"),
            Op::Lt => f.write_str("Lt"),
            Op::GtEq => f.write_str("GtEq"),
            Op::LtEq => f.write_str("LtEq"),
            Op::Assign => f.write_str("Assign"),
            Op::Get(name) => write!(f, "Get {name}"),
            Op::Call(name) => write!(f, "Call {name}"),
            Op::StoreFunc(function) => write!(f, "StoreFunc <fn {}>", function.name),
            Op::Return => f.write_str("Return"),
            Op::Pop => f.write_str("Pop"),
            Op::Jump(offset) => write!(f, "Jump {offset}"),
            Op::JumpIfFalse(offset) => write!(f, "JumpIfFalse {offset}"),
            Op::JumpIfTrue(offset) => write!(f, "JumpIfTrue {offset}"),
            Op::CreateArray(count) => write!(f, "CreateArray {count}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub span: Span,
}

impl Instruction {
    fn new(op: Op, span: Span) -> Self {
        Self { op, span }
    }
}

/// A function lowered to bytecode. The body is shared between the stored
/// function value and the frames executing it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub name: String,
    pub params: Vec<String>,
    pub code: Rc<Vec<Instruction>>,
}

/// Lower a parsed program to a flat instruction vector. Branch distances
/// are computed from the lengths of separately compiled sub-blocks, so no
/// patching pass is needed.
pub fn compile(program: &Program) -> Vec<Instruction> {
    compile_block(&program.statements)
}

fn compile_block(nodes: &[Node]) -> Vec<Instruction> {
    let mut code = Vec::new();
    for node in nodes {
        compile_node(node, &mut code);
    }
    code
}

fn compile_node(node: &Node, code: &mut Vec<Instruction>) {
    let span = node.span;
    match &node.kind {
        NodeKind::Int(value) => code.push(Instruction::new(Op::Push(Value::Int(*value)), span)),
        NodeKind::Float(value) => code.push(Instruction::new(Op::Push(Value::Float(*value)), span)),
        NodeKind::Str(value) => {
            code.push(Instruction::new(Op::Push(Value::Str(value.clone())), span));
        }
        NodeKind::Bool(value) => code.push(Instruction::new(Op::Push(Value::Bool(*value)), span)),
        NodeKind::Nil => code.push(Instruction::new(Op::Push(Value::Nil), span)),
        NodeKind::Ident(name) => code.push(Instruction::new(Op::Get(name.clone()), span)),
        NodeKind::Array(elements) => {
            for element in elements {
                compile_node(element, code);
            }
            code.push(Instruction::new(Op::CreateArray(elements.len()), span));
        }
        NodeKind::Infix { op, left, right } => {
            compile_node(left, code);
            compile_node(right, code);
            let op = match op {
                BinaryOp::Add => Op::Add,
                BinaryOp::Sub => Op::Sub,
                BinaryOp::Mul => Op::Mul,
                BinaryOp::Div => Op::Div,
                BinaryOp::Rem => Op::Rem,
                BinaryOp::Eq => Op::Eq,
                BinaryOp::NotEq => Op::NotEq,
                BinaryOp::Lt => Op::Lt,
                BinaryOp::Gt => Op::Gt,
                BinaryOp::LtEq => Op::LtEq,
                BinaryOp::GtEq => Op::GtEq,
            };
            code.push(Instruction::new(op, span));
        }
        NodeKind::Assign { name, value } => {
            code.push(Instruction::new(Op::Push(Value::Str(name.clone())), span));
            compile_node(value, code);
            code.push(Instruction::new(Op::Assign, span));
        }
        NodeKind::Increment(name) => compile_step(name, Op::Add, span, code),
        NodeKind::Decrement(name) => compile_step(name, Op::Sub, span, code),
        NodeKind::If {
            condition,
            consequence,
            alternative,
        } => {
            compile_node(condition, code);
            let then_code = compile_block(consequence);
            match alternative {
                None => {
                    code.push(Instruction::new(
                        Op::JumpIfFalse(then_code.len() as isize + 1),
                        span,
                    ));
                    code.extend(then_code);
                }
                Some(alternative) => {
                    let else_code = compile_block(alternative);
                    code.push(Instruction::new(
                        Op::JumpIfFalse(then_code.len() as isize + 2),
                        span,
                    ));
                    code.extend(then_code);
                    code.push(Instruction::new(
                        Op::Jump(else_code.len() as isize + 1),
                        span,
                    ));
                    code.extend(else_code);
                }
            }
        }
        NodeKind::For {
            init,
            condition,
            update,
            body,
        } => {
            if let Some(init) = init {
                compile_node(init, code);
            }

            let cond_code = match condition {
                Some(condition) => {
                    let mut cond = Vec::new();
                    compile_node(condition, &mut cond);
                    cond
                }
                // Headless loop: condition defaults to true.
                None => vec![Instruction::new(Op::Push(Value::Bool(true)), span)],
            };
            let update_code = match update {
                Some(update) => {
                    let mut upd = Vec::new();
                    compile_node(update, &mut upd);
                    upd
                }
                None => Vec::new(),
            };
            let body_code = compile_block(body);

            // cond / JumpIfFalse(exit) / body / update / Jump(cond)
            let cond_len = cond_code.len() as isize;
            let tail_len = (body_code.len() + update_code.len()) as isize;
            code.extend(cond_code);
            code.push(Instruction::new(Op::JumpIfFalse(tail_len + 2), span));
            code.extend(body_code);
            code.extend(update_code);
            code.push(Instruction::new(Op::Jump(-(tail_len + cond_len + 1)), span));
        }
        NodeKind::Function { name, params, body } => {
            let function = CompiledFunction {
                name: name.clone(),
                params: params.clone(),
                code: Rc::new(compile_block(body)),
            };
            code.push(Instruction::new(Op::StoreFunc(Rc::new(function)), span));
        }
        NodeKind::Call { name, args } => {
            for arg in args {
                compile_node(arg, code);
            }
            code.push(Instruction::new(
                Op::Push(Value::Int(args.len() as i64)),
                span,
            ));
            code.push(Instruction::new(Op::Call(name.clone()), span));
        }
        NodeKind::Return(value) => {
            match value {
                Some(value) => compile_node(value, code),
                // A bare return still carries a value so RETURN never
                // scavenges the caller's operands.
                None => code.push(Instruction::new(Op::Push(Value::Nil), span)),
            }
            code.push(Instruction::new(Op::Return, span));
        }
    }
}

/// `name++` / `name--` lower to `name = name +/- 1`.
fn compile_step(name: &str, op: Op, span: Span, code: &mut Vec<Instruction>) {
    code.push(Instruction::new(
        Op::Push(Value::Str(name.to_string())),
        span,
    ));
    code.push(Instruction::new(Op::Get(name.to_string()), span));
    code.push(Instruction::new(Op::Push(Value::Int(1)), span));
    code.push(Instruction::new(op, span));
    code.push(Instruction::new(Op::Assign, span));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn compile_source(source: &str) -> Vec<Instruction> {
        compile(&parse_source(source).expect("parse should succeed"))
    }

    fn ops(code: &[Instruction]) -> Vec<&Op> {
        code.iter().map(|instruction| &instruction.op).collect()
    }

    /// Every jump in `code` (and in stored function bodies) must land on
    /// an instruction of its own block, or exactly one past the end.
    fn assert_jumps_in_bounds(code: &[Instruction]) {
        for (index, instruction) in code.iter().enumerate() {
            match &instruction.op {
                Op::Jump(offset) | Op::JumpIfFalse(offset) | Op::JumpIfTrue(offset) => {
                    let target = index as isize + offset;
                    assert!(
                        target >= 0 && target as usize <= code.len(),
                        "jump at {index} with offset {offset} escapes block of {} instructions",
                        code.len()
                    );
                }
                Op::StoreFunc(function) => assert_jumps_in_bounds(&function.code),
                _ => {}
            }
        }
    }

    #[test]
    fn lowers_assignment() {
        let code = compile_source("x = 1 + 2");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Push(Value::Str("x".to_string())),
                &Op::Push(Value::Int(1)),
                &Op::Push(Value::Int(2)),
                &Op::Add,
                &Op::Assign,
            ]
        );
    }

    #[test]
    fn lowers_increment_as_add_assign() {
        let code = compile_source("i++");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Push(Value::Str("i".to_string())),
                &Op::Get("i".to_string()),
                &Op::Push(Value::Int(1)),
                &Op::Add,
                &Op::Assign,
            ]
        );
    }

    #[test]
    fn lowers_if_without_else() {
        let code = compile_source("if x < 1 { y = 2 }");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Get("x".to_string()),
                &Op::Push(Value::Int(1)),
                &Op::Lt,
                &Op::JumpIfFalse(4), // over the three-instruction then block
                &Op::Push(Value::Str("y".to_string())),
                &Op::Push(Value::Int(2)),
                &Op::Assign,
            ]
        );
        assert_jumps_in_bounds(&code);
    }

    #[test]
    fn lowers_if_else_with_skip_over_else() {
        let code = compile_source("if x < 1 { 10 } else { 20 }");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Get("x".to_string()),
                &Op::Push(Value::Int(1)),
                &Op::Lt,
                &Op::JumpIfFalse(3), // to the else block
                &Op::Push(Value::Int(10)),
                &Op::Jump(2), // past the else block
                &Op::Push(Value::Int(20)),
            ]
        );
        assert_jumps_in_bounds(&code);
    }

    #[test]
    fn lowers_three_part_for() {
        let code = compile_source("for i = 0; i < 3; i = i + 1 { x = i }");
        assert_eq!(
            ops(&code),
            vec![
                // init
                &Op::Push(Value::Str("i".to_string())),
                &Op::Push(Value::Int(0)),
                &Op::Assign,
                // condition
                &Op::Get("i".to_string()),
                &Op::Push(Value::Int(3)),
                &Op::Lt,
                &Op::JumpIfFalse(10),
                // body
                &Op::Push(Value::Str("x".to_string())),
                &Op::Get("i".to_string()),
                &Op::Assign,
                // update
                &Op::Push(Value::Str("i".to_string())),
                &Op::Get("i".to_string()),
                &Op::Push(Value::Int(1)),
                &Op::Add,
                &Op::Assign,
                // back to the condition
                &Op::Jump(-12),
            ]
        );
        assert_jumps_in_bounds(&code);
    }

    #[test]
    fn headless_for_pushes_true_condition() {
        let code = compile_source("for { i++ }");
        assert_eq!(code[0].op, Op::Push(Value::Bool(true)));
        assert!(matches!(code[1].op, Op::JumpIfFalse(_)));
        assert!(matches!(code.last().map(|i| &i.op), Some(Op::Jump(_))));
        assert_jumps_in_bounds(&code);
    }

    #[test]
    fn lowers_call_with_argument_count() {
        let code = compile_source("print(\"hi\", 42)");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Push(Value::Str("hi".to_string())),
                &Op::Push(Value::Int(42)),
                &Op::Push(Value::Int(2)),
                &Op::Call("print".to_string()),
            ]
        );
    }

    #[test]
    fn lowers_function_to_store_func() {
        let code = compile_source("func add(a, b) { return a + b }");
        assert_eq!(code.len(), 1);
        let Op::StoreFunc(function) = &code[0].op else {
            panic!("expected StoreFunc, got {:?}", code[0].op);
        };
        assert_eq!(function.name, "add");
        assert_eq!(function.params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            ops(&function.code),
            vec![
                &Op::Get("a".to_string()),
                &Op::Get("b".to_string()),
                &Op::Add,
                &Op::Return,
            ]
        );
    }

    #[test]
    fn function_without_return_still_ends_in_return() {
        let code = compile_source("func noop() { x = 1 }");
        let Op::StoreFunc(function) = &code[0].op else {
            panic!("expected StoreFunc");
        };
        let body = ops(&function.code);
        assert_eq!(body[body.len() - 2..], [&Op::Push(Value::Nil), &Op::Return]);
    }

    #[test]
    fn lowers_array_literal() {
        let code = compile_source("[1, 2, 3]");
        assert_eq!(
            ops(&code),
            vec![
                &Op::Push(Value::Int(1)),
                &Op::Push(Value::Int(2)),
                &Op::Push(Value::Int(3)),
                &Op::CreateArray(3),
            ]
        );
    }

    #[test]
    fn nested_control_flow_keeps_jumps_in_bounds() {
        let code = compile_source(
            "func f(n) {\
                for i = 0; i < n; i = i + 1 {\
                    if i % 2 == 0 { a = i } else { b = i }\
                }\
                return n\
            }\
            f(4)",
        );
        assert_jumps_in_bounds(&code);
    }

    #[test]
    fn instructions_carry_source_positions() {
        let code = compile_source("x = 1\ny = 2");
        assert_eq!(code[0].span.line, 1);
        assert_eq!(code[3].span.line, 2);
    }
}
