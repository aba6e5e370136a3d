use crate::value::{RuntimeError, Value};

/// Host functions available to every program. Both back-ends bind these
/// in the global scope under their source-level names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFunction {
    Print,
    Length,
}

impl BuiltinFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Length => "length",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "print" => Some(Self::Print),
            "length" => Some(Self::Length),
            _ => None,
        }
    }

    /// Invoke the handler. `print` appends one line to `output`; the
    /// caller decides when that buffer reaches stdout.
    pub fn call(self, args: Vec<Value>, output: &mut Vec<String>) -> Result<Value, RuntimeError> {
        match self {
            Self::Print => {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                output.push(line);
                Ok(Value::Nil)
            }
            // TODO: define length for strings and arrays.
            Self::Length => Ok(Value::Nil),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn print_joins_arguments_with_spaces() {
        let mut output = Vec::new();
        let result = BuiltinFunction::Print.call(
            vec![
                Value::Str("hello".to_string()),
                Value::Int(42),
                Value::Bool(true),
            ],
            &mut output,
        );
        assert_eq!(result, Ok(Value::Nil));
        assert_eq!(output, vec!["hello 42 true".to_string()]);
    }

    #[test]
    fn print_of_nothing_emits_empty_line() {
        let mut output = Vec::new();
        BuiltinFunction::Print
            .call(vec![], &mut output)
            .expect("print never fails");
        assert_eq!(output, vec![String::new()]);
    }

    #[test]
    fn length_is_a_stub() {
        let mut output = Vec::new();
        let result = BuiltinFunction::Length.call(vec![Value::Str("abc".to_string())], &mut output);
        assert_eq!(result, Ok(Value::Nil));
        assert!(output.is_empty());
    }

    #[test]
    fn resolves_names() {
        assert_eq!(
            BuiltinFunction::from_name("print"),
            Some(BuiltinFunction::Print)
        );
        assert_eq!(
            BuiltinFunction::from_name("length"),
            Some(BuiltinFunction::Length)
        );
        assert_eq!(BuiltinFunction::from_name("type"), None);
    }
}
