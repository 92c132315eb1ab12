//! Fibonacci demo program.
//!
//! Each thread computes `fib(n + thread_num)`, where `n` is imported into
//! every worker, logs it, appends a CSV row and returns the value.

use elea_parallel::{ImportedVariables, WorkerContext, WorkerFault};
use serde_json::{json, Value};

/// Name of the imported base index.
pub const FIB_BASE_VAR: &str = "n";

/// Column names of the rows the demo appends.
pub const CSV_HEADER: [&str; 3] = ["thread", "n", "fib"];

/// `fib(n)`, or `None` if it does not fit in a `u64`.
pub fn fibonacci(n: u64) -> Option<u64> {
    if n == 0 {
        return Some(0);
    }
    let (mut prev, mut curr) = (0u64, 1u64);
    for _ in 1..n {
        let next = prev.checked_add(curr)?;
        prev = curr;
        curr = next;
    }
    Some(curr)
}

/// Imports for a demo run starting at `fib_base`.
pub fn imports(fib_base: u64) -> ImportedVariables {
    ImportedVariables::new().import(FIB_BASE_VAR, fib_base)
}

/// The demo's statement block.
pub fn fibonacci_block(ctx: &mut WorkerContext) -> Result<Value, WorkerFault> {
    let base = ctx
        .var(FIB_BASE_VAR)
        .and_then(Value::as_u64)
        .ok_or_else(|| WorkerFault::new(format!("`{}` is not a non-negative integer", FIB_BASE_VAR)))?;
    let thread = ctx.thread_num();
    let n = base + u64::from(thread);

    let value =
        fibonacci(n).ok_or_else(|| WorkerFault::new(format!("fib({}) overflows u64", n)))?;

    ctx.console_log(json!([format!("fib({}) =", n), value]));
    ctx.save_in_csv(vec![json!(thread), json!(n), json!(value)]);
    Ok(json!(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_small_values() {
        let values: Vec<_> = (0..10).map(|n| fibonacci(n).unwrap()).collect();
        assert_eq!(values, vec![0, 1, 1, 2, 3, 5, 8, 13, 21, 34]);
    }

    #[test]
    fn test_fibonacci_u64_boundary() {
        assert_eq!(fibonacci(93), Some(12_200_160_415_121_876_738));
        assert_eq!(fibonacci(94), None);
    }

    #[test]
    fn test_imports_carry_base() {
        let imports = imports(12);
        assert_eq!(
            imports.iter().collect::<Vec<_>>(),
            vec![(FIB_BASE_VAR, &json!(12))]
        );
    }
}
