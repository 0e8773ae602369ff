#![forbid(unsafe_code)]

//! Runtime support shared by every lowered program: checked integer
//! arithmetic, 1-based index translation, faults, the string arena and the
//! builtin procedures.

pub const RUNTIME_HEADER: &str = "ark_runtime.h";
pub const RUNTIME_SOURCE: &str = "ark_runtime.c";

pub(crate) fn emit_runtime_h() -> String {
    let mut out = String::new();
    out.push_str("#ifndef ARK_RUNTIME_H\n#define ARK_RUNTIME_H\n\n");
    out.push_str("#include <stdbool.h>\n#include <stddef.h>\n#include <stdint.h>\n");
    out.push_str("#include <stdlib.h>\n#include <string.h>\n\n");
    out.push_str("typedef const char *ark_str;\n\n");

    out.push_str("/* process lifetime */\n");
    out.push_str("void ark_rt_init(void);\n");
    out.push_str("void ark_rt_fini(void);\n");
    out.push_str("_Noreturn void ark_rt_fault(const char *what);\n");
    out.push_str("_Noreturn void ark_rt_missing_return(const char *proc);\n\n");

    out.push_str("/* memory */\n");
    out.push_str("void *ark_rt_alloc(size_t size);\n");
    out.push_str("void *ark_rt_realloc(void *ptr, size_t size);\n");
    out.push_str("void *ark_rt_arena_alloc(size_t size);\n\n");

    out.push_str("/* checked arithmetic */\n");
    for op in ["add", "sub", "mul", "div", "rem", "shl", "shr"] {
        out.push_str(&format!("int64_t ark_rt_{op}(int64_t a, int64_t b);\n"));
    }
    out.push_str("int64_t ark_rt_neg(int64_t a);\n");
    out.push_str("int64_t ark_rt_post_inc(int64_t *place);\n");
    out.push_str("int64_t ark_rt_post_dec(int64_t *place);\n");
    out.push_str("double ark_rt_fdiv(double a, double b);\n");
    out.push_str("double ark_rt_fmod(double a, double b);\n");
    out.push_str("int64_t ark_rt_f2i(double v);\n");
    out.push_str("int64_t ark_rt_index(int64_t i, int64_t len);\n\n");

    out.push_str("/* strings */\n");
    out.push_str("ark_str ark_rt_concat(ark_str a, ark_str b);\n");
    out.push_str("ark_str ark_rt_int_str(int64_t v);\n");
    out.push_str("ark_str ark_rt_float_str(double v);\n");
    out.push_str("ark_str ark_rt_bool_str(bool v);\n");
    out.push_str("int ark_rt_str_cmp(ark_str a, ark_str b);\n\n");

    out.push_str("/* builtins */\n");
    out.push_str("void ark_print_int(int64_t v);\n");
    out.push_str("void ark_print_float(double v);\n");
    out.push_str("void ark_print_str(ark_str v);\n");
    out.push_str("void ark_print_bool(bool v);\n");
    out.push_str("int64_t ark_int_of_str(ark_str s);\n");
    out.push_str("double ark_float_of_str(ark_str s);\n");
    out.push_str("bool ark_bool_of_str(ark_str s);\n");
    out.push_str("int64_t ark_str_len(ark_str s);\n");
    out.push_str("double ark_sqrt(double v);\n");
    out.push_str("double ark_pow(double a, double b);\n");
    out.push_str("int64_t ark_abs_int(int64_t v);\n");
    out.push_str("double ark_abs_float(double v);\n");
    out.push_str("ark_str ark_input(ark_str prompt);\n\n");

    out.push_str("#endif\n");
    out
}

pub(crate) fn emit_runtime_c() -> String {
    let mut out = String::new();
    out.push_str("#include \"ark_runtime.h\"\n\n");
    out.push_str("#include <errno.h>\n#include <math.h>\n#include <stdio.h>\n\n");
    out.push_str(ARENA);
    out.push_str(FAULTS);
    out.push_str(ARITHMETIC);
    out.push_str(STRINGS);
    out.push_str(BUILTINS);
    out
}

// Strings and closure environments live until the process exits.
const ARENA: &str = r#"typedef union ark_rt_block {
  union ark_rt_block *next;
  max_align_t align_;
} ark_rt_block;

static ark_rt_block *ark_rt_blocks = NULL;

void ark_rt_init(void) {
  ark_rt_blocks = NULL;
}

void ark_rt_fini(void) {
  while (ark_rt_blocks != NULL) {
    ark_rt_block *next = ark_rt_blocks->next;
    free(ark_rt_blocks);
    ark_rt_blocks = next;
  }
  fflush(stdout);
}

void *ark_rt_alloc(size_t size) {
  void *p = malloc(size == 0 ? 1 : size);
  if (p == NULL) ark_rt_fault("out of memory");
  return p;
}

void *ark_rt_realloc(void *ptr, size_t size) {
  void *p = realloc(ptr, size == 0 ? 1 : size);
  if (p == NULL) ark_rt_fault("out of memory");
  return p;
}

void *ark_rt_arena_alloc(size_t size) {
  ark_rt_block *b = ark_rt_alloc(sizeof *b + size);
  b->next = ark_rt_blocks;
  ark_rt_blocks = b;
  return b + 1;
}

"#;

const FAULTS: &str = r#"_Noreturn void ark_rt_fault(const char *what) {
  fflush(stdout);
  fprintf(stderr, "ark: runtime fault: %s\n", what);
  _Exit(EXIT_FAILURE);
}

_Noreturn void ark_rt_missing_return(const char *proc) {
  fflush(stdout);
  fprintf(stderr, "ark: runtime fault: `%s` finished without returning a value\n", proc);
  _Exit(EXIT_FAILURE);
}

"#;

const ARITHMETIC: &str = r#"int64_t ark_rt_add(int64_t a, int64_t b) {
  if ((b > 0 && a > INT64_MAX - b) || (b < 0 && a < INT64_MIN - b)) ark_rt_fault("integer overflow");
  return a + b;
}

int64_t ark_rt_sub(int64_t a, int64_t b) {
  if ((b < 0 && a > INT64_MAX + b) || (b > 0 && a < INT64_MIN + b)) ark_rt_fault("integer overflow");
  return a - b;
}

int64_t ark_rt_mul(int64_t a, int64_t b) {
  if (a > 0) {
    if (b > 0) {
      if (a > INT64_MAX / b) ark_rt_fault("integer overflow");
    } else if (b < INT64_MIN / a) {
      ark_rt_fault("integer overflow");
    }
  } else if (b > 0) {
    if (a < INT64_MIN / b) ark_rt_fault("integer overflow");
  } else if (a != 0 && b < INT64_MAX / a) {
    ark_rt_fault("integer overflow");
  }
  return a * b;
}

int64_t ark_rt_div(int64_t a, int64_t b) {
  if (b == 0) ark_rt_fault("division by zero");
  if (a == INT64_MIN && b == -1) ark_rt_fault("integer overflow");
  return a / b;
}

int64_t ark_rt_rem(int64_t a, int64_t b) {
  if (b == 0) ark_rt_fault("division by zero");
  if (b == -1) return 0;
  return a % b;
}

int64_t ark_rt_shl(int64_t a, int64_t b) {
  if (b < 0 || b > 63) ark_rt_fault("shift amount out of range");
  return (int64_t)((uint64_t)a << b);
}

int64_t ark_rt_shr(int64_t a, int64_t b) {
  if (b < 0 || b > 63) ark_rt_fault("shift amount out of range");
  return a >> b;
}

int64_t ark_rt_neg(int64_t a) {
  if (a == INT64_MIN) ark_rt_fault("integer overflow");
  return -a;
}

int64_t ark_rt_post_inc(int64_t *place) {
  int64_t old = *place;
  *place = ark_rt_add(old, 1);
  return old;
}

int64_t ark_rt_post_dec(int64_t *place) {
  int64_t old = *place;
  *place = ark_rt_sub(old, 1);
  return old;
}

double ark_rt_fdiv(double a, double b) {
  if (b == 0.0) ark_rt_fault("division by zero");
  return a / b;
}

double ark_rt_fmod(double a, double b) {
  if (b == 0.0) ark_rt_fault("division by zero");
  return fmod(a, b);
}

int64_t ark_rt_f2i(double v) {
  if (!(v >= -9223372036854775808.0 && v < 9223372036854775808.0)) {
    ark_rt_fault("float to int conversion out of range");
  }
  return (int64_t)v;
}

int64_t ark_rt_index(int64_t i, int64_t len) {
  if (i < 1 || i > len) {
    fflush(stdout);
    fprintf(stderr, "ark: runtime fault: index %lld out of range 1..%lld\n", (long long)i, (long long)len);
    _Exit(EXIT_FAILURE);
  }
  return i - 1;
}

"#;

const STRINGS: &str = r#"static ark_str ark_rt_nonnull(ark_str s) {
  return s == NULL ? "" : s;
}

ark_str ark_rt_concat(ark_str a, ark_str b) {
  a = ark_rt_nonnull(a);
  b = ark_rt_nonnull(b);
  size_t la = strlen(a);
  size_t lb = strlen(b);
  char *s = ark_rt_arena_alloc(la + lb + 1);
  memcpy(s, a, la);
  memcpy(s + la, b, lb);
  s[la + lb] = '\0';
  return s;
}

ark_str ark_rt_int_str(int64_t v) {
  char *s = ark_rt_arena_alloc(24);
  snprintf(s, 24, "%lld", (long long)v);
  return s;
}

/* Shortest digits that read back as the same double, written positionally;
   integral values keep a trailing ".0". */
ark_str ark_rt_float_str(double v) {
  char *s = ark_rt_arena_alloc(400);
  if (!isfinite(v)) {
    snprintf(s, 400, "%g", v);
    return s;
  }
  char sci[40];
  int prec;
  for (prec = 1; prec < 17; prec++) {
    snprintf(sci, sizeof sci, "%.*e", prec - 1, v);
    if (strtod(sci, NULL) == v) break;
  }
  snprintf(sci, sizeof sci, "%.*e", prec - 1, v);
  int decimals = prec - 1 - atoi(strchr(sci, 'e') + 1);
  if (decimals < 0) decimals = 0;
  snprintf(s, 400, "%.*f", decimals, v);
  char *dot = strchr(s, '.');
  if (dot == NULL) {
    strcat(s, ".0");
  } else {
    size_t n = strlen(s);
    while (n > (size_t)(dot - s) + 2 && s[n - 1] == '0') s[--n] = '\0';
  }
  return s;
}

ark_str ark_rt_bool_str(bool v) {
  return v ? "true" : "false";
}

int ark_rt_str_cmp(ark_str a, ark_str b) {
  return strcmp(ark_rt_nonnull(a), ark_rt_nonnull(b));
}

"#;

const BUILTINS: &str = r#"void ark_print_int(int64_t v) {
  printf("%lld\n", (long long)v);
}

void ark_print_float(double v) {
  printf("%s\n", ark_rt_float_str(v));
}

void ark_print_str(ark_str v) {
  printf("%s\n", ark_rt_nonnull(v));
}

void ark_print_bool(bool v) {
  printf("%s\n", v ? "true" : "false");
}

int64_t ark_int_of_str(ark_str s) {
  char *end = NULL;
  s = ark_rt_nonnull(s);
  errno = 0;
  long long v = strtoll(s, &end, 10);
  if (end == s || *end != '\0' || errno == ERANGE) ark_rt_fault("string is not a valid int");
  return (int64_t)v;
}

double ark_float_of_str(ark_str s) {
  char *end = NULL;
  s = ark_rt_nonnull(s);
  double v = strtod(s, &end);
  if (end == s || *end != '\0') ark_rt_fault("string is not a valid float");
  return v;
}

bool ark_bool_of_str(ark_str s) {
  s = ark_rt_nonnull(s);
  return s[0] != '\0' && strcmp(s, "false") != 0;
}

int64_t ark_str_len(ark_str s) {
  return (int64_t)strlen(ark_rt_nonnull(s));
}

double ark_sqrt(double v) {
  return sqrt(v);
}

double ark_pow(double a, double b) {
  return pow(a, b);
}

int64_t ark_abs_int(int64_t v) {
  if (v == INT64_MIN) ark_rt_fault("integer overflow");
  return v < 0 ? -v : v;
}

double ark_abs_float(double v) {
  return fabs(v);
}

ark_str ark_input(ark_str prompt) {
  if (prompt != NULL) {
    printf("%s", prompt);
  }
  fflush(stdout);
  size_t cap = 64;
  size_t len = 0;
  char *buf = ark_rt_alloc(cap);
  int c;
  while ((c = getchar()) != EOF && c != '\n') {
    if (len + 1 == cap) {
      cap *= 2;
      buf = ark_rt_realloc(buf, cap);
    }
    buf[len++] = (char)c;
  }
  if (len > 0 && buf[len - 1] == '\r') len--;
  char *s = ark_rt_arena_alloc(len + 1);
  memcpy(s, buf, len);
  s[len] = '\0';
  free(buf);
  return s;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_declares_everything_the_source_defines() {
        let h = emit_runtime_h();
        let c = emit_runtime_c();
        for name in [
            "ark_rt_fault",
            "ark_rt_index",
            "ark_rt_concat",
            "ark_rt_arena_alloc",
            "ark_print_float",
            "ark_input",
        ] {
            assert!(h.contains(&format!("{name}(")), "header lacks {name}");
            assert!(c.contains(&format!("{name}(")), "source lacks {name}");
        }
        assert!(c.starts_with(&format!("#include \"{RUNTIME_HEADER}\"")));
    }
}
