#![forbid(unsafe_code)]

use std::fmt;

/// Identity of a compile unit: its path relative to the search root, without
/// the `.ark` extension (`main`, `util/strings`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record, enum or namespace, named by its defining module.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactRef {
    pub module: ModuleId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    String,
    Bool,
    Void,
    /// Record or enum.
    Artifact(ArtifactRef),
    Array(Box<Type>, u64),
    List(Box<Type>),
    Proc(Vec<Type>, Box<Type>),
    /// Only produced while recovering from an error; compatible with everything.
    Unknown,
}

impl Type {
    pub fn display(&self) -> String {
        match self {
            Type::Int => "int".to_string(),
            Type::Float => "float".to_string(),
            Type::String => "string".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Void => "void".to_string(),
            Type::Artifact(a) => a.name.clone(),
            Type::Array(elem, n) => format!("[{}; {n}]", elem.display()),
            Type::List(elem) => format!("[{}]", elem.display()),
            Type::Proc(params, ret) => {
                let params_s = params
                    .iter()
                    .map(|t| t.display())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({params_s}) -> {}", ret.display())
            }
            Type::Unknown => "<unknown>".to_string(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// Whether a value of this type owns a heap buffer.
    pub fn is_list(&self) -> bool {
        matches!(self, Type::List(_))
    }

    /// Whether a list buffer is reachable from a value of this type.
    pub fn contains_list(&self) -> bool {
        match self {
            Type::List(_) => true,
            Type::Array(elem, _) => elem.contains_list(),
            _ => false,
        }
    }

    pub fn elem(&self) -> Option<&Type> {
        match self {
            Type::Array(elem, _) | Type::List(elem) => Some(elem),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
