//! Host namespaces that extension modules may import
//!
//! Everything here is side-effect free: no filesystem, network, clock or
//! process access. Functions that take pointers only touch the calling
//! module's own exported memory.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use std::ops::Range;
use wasmtime::{Caller, Extern, Linker, Memory};

/// Width of one `collections` element (little-endian i64)
const ELEM: usize = 8;

/// Namespaces and the operations each one provides
pub const LIBRARIES: &[(&str, &[&str])] = &[
    (
        "math",
        &[
            "sqrt", "pow", "abs", "floor", "ceil", "round", "min", "max", "exp", "ln", "log10",
            "hypot", "gcd",
        ],
    ),
    ("math.trig", &["sin", "cos", "tan", "atan2"]),
    (
        "text",
        &["char_count", "to_upper", "to_lower", "parse_int", "is_numeric"],
    ),
    ("json", &["is_valid", "array_len", "get_i64"]),
    ("base64", &["encode", "decode"]),
    ("collections", &["sort_i64", "bisect_i64", "sum_i64"]),
];

/// Whether the host implements `module.name`
pub fn provides(module: &str, name: &str) -> bool {
    LIBRARIES
        .iter()
        .any(|(lib, ops)| *lib == module && ops.contains(&name))
}

/// Register every host namespace on the linker
pub fn register(linker: &mut Linker<()>) -> Result<()> {
    register_math(linker)?;
    register_trig(linker)?;
    register_text(linker)?;
    register_json(linker)?;
    register_base64(linker)?;
    register_collections(linker)?;
    Ok(())
}

fn register_math(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap("math", "sqrt", |x: f64| x.sqrt())?;
    linker.func_wrap("math", "pow", |x: f64, y: f64| x.powf(y))?;
    linker.func_wrap("math", "abs", |x: f64| x.abs())?;
    linker.func_wrap("math", "floor", |x: f64| x.floor())?;
    linker.func_wrap("math", "ceil", |x: f64| x.ceil())?;
    linker.func_wrap("math", "round", |x: f64| x.round())?;
    linker.func_wrap("math", "min", |x: f64, y: f64| x.min(y))?;
    linker.func_wrap("math", "max", |x: f64, y: f64| x.max(y))?;
    linker.func_wrap("math", "exp", |x: f64| x.exp())?;
    linker.func_wrap("math", "ln", |x: f64| x.ln())?;
    linker.func_wrap("math", "log10", |x: f64| x.log10())?;
    linker.func_wrap("math", "hypot", |x: f64, y: f64| x.hypot(y))?;
    linker.func_wrap("math", "gcd", |a: i64, b: i64| gcd(a, b))?;
    Ok(())
}

fn register_trig(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap("math.trig", "sin", |x: f64| x.sin())?;
    linker.func_wrap("math.trig", "cos", |x: f64| x.cos())?;
    linker.func_wrap("math.trig", "tan", |x: f64| x.tan())?;
    linker.func_wrap("math.trig", "atan2", |y: f64, x: f64| y.atan2(x))?;
    Ok(())
}

fn register_text(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap(
        "text",
        "char_count",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let data = memory.data(&caller);
            let text = guest_str(data, ptr, len)?;
            i32::try_from(text.chars().count()).context("string too long")
        },
    )?;
    linker.func_wrap(
        "text",
        "to_upper",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<()> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_range(memory.data(&caller), ptr, len)?;
            memory.data_mut(&mut caller)[range].make_ascii_uppercase();
            Ok(())
        },
    )?;
    linker.func_wrap(
        "text",
        "to_lower",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<()> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_range(memory.data(&caller), ptr, len)?;
            memory.data_mut(&mut caller)[range].make_ascii_lowercase();
            Ok(())
        },
    )?;
    linker.func_wrap(
        "text",
        "parse_int",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<i64> {
            let memory = guest_memory(&mut caller)?;
            let text = guest_str(memory.data(&caller), ptr, len)?;
            text.trim()
                .parse::<i64>()
                .with_context(|| format!("not an integer: '{}'", text))
        },
    )?;
    linker.func_wrap(
        "text",
        "is_numeric",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let text = guest_str(memory.data(&caller), ptr, len)?;
            let numeric = !text.is_empty() && text.chars().all(|c| c.is_ascii_digit());
            Ok(i32::from(numeric))
        },
    )?;
    Ok(())
}

fn register_json(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap(
        "json",
        "is_valid",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let text = guest_str(memory.data(&caller), ptr, len)?;
            Ok(i32::from(serde_json::from_str::<serde_json::Value>(text).is_ok()))
        },
    )?;
    linker.func_wrap(
        "json",
        "array_len",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let value = guest_json(memory.data(&caller), ptr, len)?;
            match value.as_array() {
                Some(items) => i32::try_from(items.len()).context("array too long"),
                None => Ok(-1),
            }
        },
    )?;
    linker.func_wrap(
        "json",
        "get_i64",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32, key_ptr: i32, key_len: i32| -> Result<i64> {
            let memory = guest_memory(&mut caller)?;
            let data = memory.data(&caller);
            let value = guest_json(data, ptr, len)?;
            let key = guest_str(data, key_ptr, key_len)?;
            value
                .get(key)
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| anyhow!("no integer field '{}'", key))
        },
    )?;
    Ok(())
}

fn register_base64(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap(
        "base64",
        "encode",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32, dst: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_range(memory.data(&caller), ptr, len)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&memory.data(&caller)[range]);
            write_guest(&memory, &mut caller, dst, encoded.as_bytes())
        },
    )?;
    linker.func_wrap(
        "base64",
        "decode",
        |mut caller: Caller<'_, ()>, ptr: i32, len: i32, dst: i32| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_range(memory.data(&caller), ptr, len)?;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(&memory.data(&caller)[range])
                .context("invalid base64")?;
            write_guest(&memory, &mut caller, dst, &decoded)
        },
    )?;
    Ok(())
}

fn register_collections(linker: &mut Linker<()>) -> Result<()> {
    linker.func_wrap(
        "collections",
        "sort_i64",
        |mut caller: Caller<'_, ()>, ptr: i32, count: i32| -> Result<()> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_i64_range(memory.data(&caller), ptr, count)?;
            let mut values = read_i64s(&memory.data(&caller)[range.clone()]);
            values.sort_unstable();
            let out = &mut memory.data_mut(&mut caller)[range];
            for (chunk, value) in out.chunks_exact_mut(ELEM).zip(values) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
            Ok(())
        },
    )?;
    linker.func_wrap(
        "collections",
        "bisect_i64",
        |mut caller: Caller<'_, ()>, ptr: i32, count: i32, value: i64| -> Result<i32> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_i64_range(memory.data(&caller), ptr, count)?;
            let values = read_i64s(&memory.data(&caller)[range]);
            i32::try_from(values.partition_point(|v| *v < value)).context("array too long")
        },
    )?;
    linker.func_wrap(
        "collections",
        "sum_i64",
        |mut caller: Caller<'_, ()>, ptr: i32, count: i32| -> Result<i64> {
            let memory = guest_memory(&mut caller)?;
            let range = guest_i64_range(memory.data(&caller), ptr, count)?;
            read_i64s(&memory.data(&caller)[range])
                .into_iter()
                .try_fold(0i64, i64::checked_add)
                .ok_or_else(|| anyhow!("sum overflows i64"))
        },
    )?;
    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, ()>) -> Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("this host function requires the module to export its memory as \"memory\""))
}

/// Copy `bytes` into guest memory at `dst`; returns the byte count
fn write_guest(memory: &Memory, caller: &mut Caller<'_, ()>, dst: i32, bytes: &[u8]) -> Result<i32> {
    let count = i32::try_from(bytes.len()).context("output too long")?;
    let range = guest_range(memory.data(&*caller), dst, count)?;
    memory.data_mut(caller)[range].copy_from_slice(bytes);
    Ok(count)
}

fn guest_json(data: &[u8], ptr: i32, len: i32) -> Result<serde_json::Value> {
    serde_json::from_str(guest_str(data, ptr, len)?).context("invalid JSON")
}

fn guest_i64_range(data: &[u8], ptr: i32, count: i32) -> Result<Range<usize>> {
    let Some(len) = count.checked_mul(ELEM as i32) else {
        bail!("array of {} elements is too long", count);
    };
    guest_range(data, ptr, len)
}

fn read_i64s(bytes: &[u8]) -> Vec<i64> {
    bytes
        .chunks_exact(ELEM)
        .map(|chunk| {
            let mut raw = [0u8; ELEM];
            raw.copy_from_slice(chunk);
            i64::from_le_bytes(raw)
        })
        .collect()
}

fn guest_range(data: &[u8], ptr: i32, len: i32) -> Result<Range<usize>> {
    let start = usize::try_from(ptr).context("negative pointer")?;
    let len = usize::try_from(len).context("negative length")?;
    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| anyhow!("range {}..{} is outside guest memory", ptr, i64::from(ptr) + len as i64))?;
    Ok(start..end)
}

fn guest_str(data: &[u8], ptr: i32, len: i32) -> Result<&str> {
    let range = guest_range(data, ptr, len)?;
    std::str::from_utf8(&data[range]).context("string is not valid UTF-8")
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    i64::try_from(a).unwrap_or(i64::MAX)
}
