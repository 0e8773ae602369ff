#![forbid(unsafe_code)]

use crate::types::Type;

/// Free functions supplied by the runtime support library. Only their
/// signatures live here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Int,
    Float,
    Str,
    Bool,
    Sqrt,
    Abs,
    Pow,
    Len,
    Input,
}

impl Builtin {
    pub const ALL: [Builtin; 10] = [
        Builtin::Print,
        Builtin::Int,
        Builtin::Float,
        Builtin::Str,
        Builtin::Bool,
        Builtin::Sqrt,
        Builtin::Abs,
        Builtin::Pow,
        Builtin::Len,
        Builtin::Input,
    ];

    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::Sqrt => "sqrt",
            Builtin::Abs => "abs",
            Builtin::Pow => "pow",
            Builtin::Len => "len",
            Builtin::Input => "input",
        }
    }

    /// Accepted argument counts.
    pub fn arity(self) -> (usize, usize) {
        match self {
            Builtin::Input => (0, 1),
            Builtin::Pow => (2, 2),
            _ => (1, 1),
        }
    }

    /// Result type for the given argument types, or a description of what the
    /// builtin accepts.
    pub fn result(self, args: &[Type]) -> Result<Type, &'static str> {
        let scalar = |t: &Type| {
            matches!(t, Type::Int | Type::Float | Type::String | Type::Bool)
                || is_enum_like(t)
        };
        match (self, args) {
            (Builtin::Print, [t]) if scalar(t) => Ok(Type::Void),
            (Builtin::Print, _) => Err("a number, string, bool or enum value"),
            (Builtin::Int, [t]) if scalar(t) => Ok(Type::Int),
            (Builtin::Int, _) => Err("a number, string, bool or enum value"),
            (Builtin::Float, [Type::Int | Type::Float | Type::String]) => Ok(Type::Float),
            (Builtin::Float, _) => Err("a number or string"),
            (Builtin::Str, [t]) if scalar(t) => Ok(Type::String),
            (Builtin::Str, _) => Err("a number, string, bool or enum value"),
            (Builtin::Bool, [Type::Int | Type::Bool | Type::String]) => Ok(Type::Bool),
            (Builtin::Bool, _) => Err("an int, bool or string"),
            (Builtin::Sqrt, [Type::Int | Type::Float]) => Ok(Type::Float),
            (Builtin::Sqrt, _) => Err("a number"),
            (Builtin::Abs, [Type::Int]) => Ok(Type::Int),
            (Builtin::Abs, [Type::Float]) => Ok(Type::Float),
            (Builtin::Abs, _) => Err("a number"),
            (Builtin::Pow, [a, b]) if a.is_numeric() && b.is_numeric() => Ok(Type::Float),
            (Builtin::Pow, _) => Err("two numbers"),
            (Builtin::Len, [Type::String | Type::Array(..) | Type::List(_)]) => Ok(Type::Int),
            (Builtin::Len, _) => Err("a string, array or list"),
            (Builtin::Input, [] | [Type::String]) => Ok(Type::String),
            (Builtin::Input, _) => Err("an optional string prompt"),
        }
    }
}

// Records and enums share `Type::Artifact`; the analyzer rejects records
// before asking, so any artifact reaching here is an enum.
fn is_enum_like(t: &Type) -> bool {
    matches!(t, Type::Artifact(_))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_name(b.name()), Some(b));
        }
        assert_eq!(Builtin::from_name("printf"), None);
    }

    #[test]
    fn result_types() {
        assert_eq!(Builtin::Sqrt.result(&[Type::Int]), Ok(Type::Float));
        assert_eq!(Builtin::Abs.result(&[Type::Int]), Ok(Type::Int));
        assert_eq!(Builtin::Len.result(&[Type::List(Box::new(Type::Int))]), Ok(Type::Int));
        assert!(Builtin::Len.result(&[Type::Int]).is_err());
        assert_eq!(Builtin::Input.result(&[]), Ok(Type::String));
    }
}
