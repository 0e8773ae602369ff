#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt::Write as _;

use ark_ast::ArtifactKind;
use ark_core::{ArtifactInfo, ArtifactRef, ModuleId, Type};

use crate::{LoweringError, LoweringErrorKind};

fn segment(out: &mut String, seg: &str) {
    let clean: String = seg
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let _ = write!(out, "{}{}", clean.len(), clean);
}

/// Length-prefixed module part of a C name: `util/strings` -> `4util7strings`.
pub(crate) fn module_part(module: &ModuleId) -> String {
    let mut out = String::new();
    for seg in module.as_str().split('/') {
        segment(&mut out, seg);
    }
    out
}

/// C name of a module-level entity: `ark_4main_3Geo4area`.
pub(crate) fn mangle(module: &ModuleId, path: &[String]) -> String {
    let mut out = format!("ark_{}_", module_part(module));
    for seg in path {
        segment(&mut out, seg);
    }
    out
}

pub(crate) fn c_ident(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) fn int_lit(v: i64) -> String {
    if v == i64::MIN {
        "(-INT64_C(9223372036854775807) - 1)".to_string()
    } else {
        format!("INT64_C({v})")
    }
}

pub(crate) fn float_lit(v: f64) -> String {
    let s = format!("{v:?}");
    if s.contains(['.', 'e', 'E']) {
        s
    } else {
        format!("{s}.0")
    }
}

pub(crate) fn c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out.push('"');
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Every composite C type the program needs, in an order where each
/// definition follows the definitions it embeds by value.
pub(crate) struct TypeTable {
    artifacts: HashMap<ArtifactRef, ArtifactInfo>,
    marks: HashMap<Type, Mark>,
    order: Vec<Type>,
}

impl TypeTable {
    pub(crate) fn new(artifacts: HashMap<ArtifactRef, ArtifactInfo>) -> Self {
        Self {
            artifacts,
            marks: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub(crate) fn artifact(&self, aref: &ArtifactRef) -> Result<&ArtifactInfo, LoweringError> {
        self.artifacts.get(aref).ok_or_else(|| {
            LoweringError::new(
                LoweringErrorKind::UnsupportedConstruct,
                format!("artifact `{}` from module `{}` was never analyzed", aref.name, aref.module),
            )
        })
    }

    pub(crate) fn is_enum(&self, aref: &ArtifactRef) -> bool {
        self.artifacts
            .get(aref)
            .is_some_and(|a| a.kind == ArtifactKind::Enum)
    }

    /// Scalars that may be stored `const`.
    pub(crate) fn is_scalar(&self, ty: &Type) -> bool {
        match ty {
            Type::Int | Type::Float | Type::String | Type::Bool => true,
            Type::Artifact(a) => self.is_enum(a),
            _ => false,
        }
    }

    pub(crate) fn record_name(aref: &ArtifactRef) -> String {
        mangle(&aref.module, std::slice::from_ref(&aref.name))
    }

    fn tag(&self, ty: &Type) -> Result<String, LoweringError> {
        Ok(match ty {
            Type::Int => "i".to_string(),
            Type::Float => "f".to_string(),
            Type::String => "s".to_string(),
            Type::Bool => "b".to_string(),
            Type::Void => "v".to_string(),
            Type::Artifact(a) if self.is_enum(a) => "i".to_string(),
            Type::Artifact(a) => format!("R{}_{}", module_part(&a.module), {
                let mut s = String::new();
                segment(&mut s, &a.name);
                s
            }),
            Type::Array(elem, n) => format!("A{n}{}", self.tag(elem)?),
            Type::List(elem) => format!("L{}", self.tag(elem)?),
            Type::Proc(params, ret) => {
                let mut s = format!("P{}", params.len());
                for p in params {
                    s.push_str(&self.tag(p)?);
                }
                s.push('_');
                s.push_str(&self.tag(ret)?);
                s
            }
            Type::Unknown => return Err(unknown_type()),
        })
    }

    /// C spelling of `ty`, registering any composite type it needs.
    pub(crate) fn c_type(&mut self, ty: &Type) -> Result<String, LoweringError> {
        self.register(ty)?;
        self.name_of(ty)
    }

    fn name_of(&self, ty: &Type) -> Result<String, LoweringError> {
        Ok(match ty {
            Type::Int => "int64_t".to_string(),
            Type::Float => "double".to_string(),
            Type::String => "ark_str".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Void => "void".to_string(),
            Type::Artifact(a) if self.is_enum(a) => "int64_t".to_string(),
            Type::Artifact(a) => Self::record_name(a),
            Type::Array(..) | Type::List(_) | Type::Proc(..) => format!("ark_t_{}", self.tag(ty)?),
            Type::Unknown => return Err(unknown_type()),
        })
    }

    fn register(&mut self, ty: &Type) -> Result<(), LoweringError> {
        match ty {
            Type::Int | Type::Float | Type::String | Type::Bool | Type::Void => Ok(()),
            Type::Unknown => Err(unknown_type()),
            Type::Artifact(a) if self.is_enum(a) => Ok(()),
            _ => {
                if self.marks.contains_key(ty) {
                    return Ok(());
                }
                self.marks.insert(ty.clone(), Mark::Visiting);
                match ty {
                    Type::Artifact(a) => {
                        let props: Vec<Type> =
                            self.artifact(a)?.props.iter().map(|p| p.ty.clone()).collect();
                        for p in &props {
                            self.register(p)?;
                        }
                    }
                    Type::Array(elem, _) | Type::List(elem) => self.register(elem)?,
                    Type::Proc(params, ret) => {
                        // Function pointer parameters may name records still
                        // being defined.
                        for p in params.iter().chain(std::iter::once(&**ret)) {
                            if self.marks.get(p) != Some(&Mark::Visiting) {
                                self.register(p)?;
                            }
                        }
                    }
                    _ => {}
                }
                self.marks.insert(ty.clone(), Mark::Done);
                self.order.push(ty.clone());
                Ok(())
            }
        }
    }

    /// Zero value of a declaration without an initializer.
    pub(crate) fn default_value(&mut self, ty: &Type) -> Result<String, LoweringError> {
        let name = self.c_type(ty)?;
        Ok(match ty {
            Type::Int => "INT64_C(0)".to_string(),
            Type::Float => "0.0".to_string(),
            Type::String => "\"\"".to_string(),
            Type::Bool => "false".to_string(),
            Type::Artifact(a) if self.is_enum(a) => {
                let first = self.artifact(a)?.cases.first().map(|(_, v)| *v).unwrap_or(0);
                int_lit(first)
            }
            Type::Artifact(_) => format!("{name}__default()"),
            Type::Array(..) => format!("{name}_default()"),
            Type::List(_) => format!("{name}_empty()"),
            Type::Proc(..) => format!("(({name}){{ NULL, NULL }})"),
            Type::Void | Type::Unknown => return Err(unknown_type()),
        })
    }

    pub(crate) fn emit_definitions(&self, out: &mut String) -> Result<(), LoweringError> {
        for ty in &self.order {
            if let Type::Artifact(a) = ty {
                let name = Self::record_name(a);
                let _ = writeln!(out, "typedef struct {name} {name};");
            }
        }
        out.push('\n');

        for ty in &self.order {
            let name = self.name_of(ty)?;
            match ty {
                Type::Artifact(a) => {
                    let _ = writeln!(out, "struct {name} {{");
                    for prop in &self.artifact(a)?.props {
                        let _ = writeln!(
                            out,
                            "  {} f_{};",
                            self.name_of(&prop.ty)?,
                            c_ident(&prop.name)
                        );
                    }
                    out.push_str("};\n\n");
                }
                Type::Array(elem, n) => {
                    let _ = writeln!(
                        out,
                        "typedef struct {name} {{ {} v[{n}]; }} {name};\n",
                        self.name_of(elem)?
                    );
                }
                Type::List(elem) => {
                    let _ = writeln!(
                        out,
                        "typedef struct {name} {{ {} *data; int64_t len; int64_t cap; }} {name};\n",
                        self.name_of(elem)?
                    );
                }
                Type::Proc(params, ret) => {
                    let mut args = String::from("void *");
                    for p in params {
                        args.push_str(", ");
                        args.push_str(&self.name_of(p)?);
                    }
                    let _ = writeln!(
                        out,
                        "typedef struct {name} {{ void *env; {} (*fn)({args}); }} {name};\n",
                        self.name_of(ret)?
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `static inline` helpers for lists, arrays and procedure values.
    pub(crate) fn emit_helpers(&self, out: &mut String) -> Result<(), LoweringError> {
        for ty in &self.order {
            match ty {
                Type::List(elem) => self.emit_list_helpers(out, ty, elem)?,
                Type::Array(elem, n) => {
                    let name = self.name_of(ty)?;
                    let _ = writeln!(out, "static inline {name} {name}_default(void) {{");
                    let _ = writeln!(out, "  {name} a;");
                    let _ = writeln!(
                        out,
                        "  for (int64_t i = 0; i < {n}; i++) a.v[i] = {};",
                        self.default_expr(elem)?
                    );
                    out.push_str("  return a;\n}\n\n");
                }
                Type::Proc(params, ret) => {
                    let name = self.name_of(ty)?;
                    let ret_ty = self.name_of(ret)?;
                    let mut decl = format!("{name} p");
                    let mut call = String::from("p.env");
                    for (i, p) in params.iter().enumerate() {
                        let _ = write!(decl, ", {} a{i}", self.name_of(p)?);
                        let _ = write!(call, ", a{i}");
                    }
                    let body = if **ret == Type::Void {
                        format!("p.fn({call});")
                    } else {
                        format!("return p.fn({call});")
                    };
                    let _ = writeln!(
                        out,
                        "static inline {ret_ty} {name}_call({decl}) {{\n  {body}\n}}\n"
                    );
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn default_expr(&self, ty: &Type) -> Result<String, LoweringError> {
        let name = self.name_of(ty)?;
        Ok(match ty {
            Type::Int => "INT64_C(0)".to_string(),
            Type::Float => "0.0".to_string(),
            Type::String => "\"\"".to_string(),
            Type::Bool => "false".to_string(),
            Type::Artifact(a) if self.is_enum(a) => {
                int_lit(self.artifact(a)?.cases.first().map(|(_, v)| *v).unwrap_or(0))
            }
            Type::Artifact(_) => format!("{name}__default()"),
            Type::Array(..) => format!("{name}_default()"),
            Type::List(_) => format!("{name}_empty()"),
            Type::Proc(..) => format!("(({name}){{ NULL, NULL }})"),
            Type::Void | Type::Unknown => return Err(unknown_type()),
        })
    }

    fn emit_list_helpers(&self, out: &mut String, ty: &Type, elem: &Type) -> Result<(), LoweringError> {
        let l = self.name_of(ty)?;
        let t = self.name_of(elem)?;
        let nested = elem.is_list();
        let elem_name = self.name_of(elem)?;

        let _ = write!(
            out,
            "static inline {l} {l}_empty(void) {{
  {l} l;
  l.data = NULL;
  l.len = 0;
  l.cap = 0;
  return l;
}}

static inline void {l}_free({l} *l) {{
"
        );
        if nested {
            let _ = writeln!(
                out,
                "  for (int64_t i = 0; i < l->len; i++) {elem_name}_free(&l->data[i]);"
            );
        }
        let _ = write!(
            out,
            "  free(l->data);
  *l = {l}_empty();
}}

static inline void {l}_drop({l} l) {{
  {l}_free(&l);
}}

static inline void {l}_assign({l} *dst, {l} src) {{
  {l}_free(dst);
  *dst = src;
}}

static inline void {l}_push({l} *l, {t} v) {{
  if (l->len == l->cap) {{
    int64_t cap = l->cap ? l->cap * 2 : 4;
    l->data = ark_rt_realloc(l->data, (size_t)cap * sizeof *l->data);
    l->cap = cap;
  }}
  l->data[l->len++] = v;
}}

static inline {t} {l}_pop({l} *l) {{
  if (l->len == 0) ark_rt_fault(\"pop from an empty list\");
  return l->data[--l->len];
}}

static inline {t} *{l}_at({l} *l, int64_t i) {{
  return &l->data[ark_rt_index(i, l->len)];
}}

static inline {l} {l}_from(const {t} *items, int64_t n) {{
  {l} l = {l}_empty();
  if (n > 0) {{
    l.data = ark_rt_alloc((size_t)n * sizeof *l.data);
    memcpy(l.data, items, (size_t)n * sizeof *l.data);
    l.len = n;
    l.cap = n;
  }}
  return l;
}}

static inline {l} {l}_clone({l} l) {{
  {l} c = {l}_empty();
  if (l.len == 0) return c;
  c.data = ark_rt_alloc((size_t)l.len * sizeof *c.data);
  c.len = l.len;
  c.cap = l.len;
"
        );
        if nested {
            let _ = writeln!(
                out,
                "  for (int64_t i = 0; i < l.len; i++) c.data[i] = {elem_name}_clone(l.data[i]);"
            );
        } else {
            out.push_str("  memcpy(c.data, l.data, (size_t)l.len * sizeof *c.data);\n");
        }
        let _ = write!(
            out,
            "  return c;
}}

static inline int64_t {l}_len_take({l} l) {{
  int64_t n = l.len;
  {l}_free(&l);
  return n;
}}

static inline {t} {l}_get_take({l} l, int64_t i) {{
  int64_t at = ark_rt_index(i, l.len);
  {t} v = l.data[at];
"
        );
        if nested {
            let _ = writeln!(out, "  l.data[at] = {elem_name}_empty();");
        }
        let _ = write!(
            out,
            "  {l}_free(&l);
  return v;
}}

"
        );
        Ok(())
    }
}

fn unknown_type() -> LoweringError {
    LoweringError::new(
        LoweringErrorKind::UnsupportedConstruct,
        "unresolved type reached lowering",
    )
}
