//! Cache-backed regex functions exposed to expression programs.
//!
//! `_regex_test` and `_regex_capture` take their operands as a two-element
//! `[input, pattern]` array so they can stay arity zero; the jq wrappers in
//! the program prelude (`test_cached`, `capture_cached`) build that array.

use jaq_interpret::{Args, Ctx, Error, Native, Val};
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::regex_cache::RegexCache;

type ValR = Result<Val, Error>;
type Outputs<'a> = Box<dyn Iterator<Item = ValR> + 'a>;

/// Process-wide matcher cache. jaq natives are plain function pointers, so
/// the cache cannot be threaded through them; this module is the only owner.
static REGEX_CACHE: Lazy<RegexCache> = Lazy::new(RegexCache::default);

/// The singleton cache, for diagnostics and tests.
pub fn regex_cache() -> &'static RegexCache {
    &REGEX_CACHE
}

pub(crate) fn natives() -> Vec<(String, usize, Native)> {
    vec![
        ("_regex_test".to_string(), 0, Native::new(regex_test)),
        ("_regex_capture".to_string(), 0, Native::new(regex_capture)),
    ]
}

fn regex_test<'a>(_args: Args<'a>, (_, input): (Ctx<'a>, Val)) -> Outputs<'a> {
    Box::new(std::iter::once(test_impl(input)))
}

fn regex_capture<'a>(_args: Args<'a>, (_, input): (Ctx<'a>, Val)) -> Outputs<'a> {
    match capture_impl(input) {
        Ok(Some(v)) => Box::new(std::iter::once(Ok(v))),
        Ok(None) => Box::new(std::iter::empty()),
        Err(e) => Box::new(std::iter::once(Err(e))),
    }
}

fn test_impl(input: Val) -> ValR {
    let (s, pattern) = unpack(input, "_regex_test")?;
    let re = REGEX_CACHE
        .get(&pattern)
        .map_err(|e| Error::str(e.to_string()))?;
    Ok(Val::from(Value::Bool(re.is_match(&s))))
}

fn capture_impl(input: Val) -> Result<Option<Val>, Error> {
    let (s, pattern) = unpack(input, "_regex_capture")?;
    let re = REGEX_CACHE
        .get(&pattern)
        .map_err(|e| Error::str(e.to_string()))?;

    let Some(caps) = re.captures(&s) else {
        return Ok(None);
    };

    let mut obj = serde_json::Map::new();
    for name in re.capture_names().flatten() {
        if let Some(m) = caps.name(name) {
            obj.insert(name.to_string(), Value::String(m.as_str().to_string()));
        }
    }
    Ok(Some(Val::from(Value::Object(obj))))
}

fn unpack(input: Val, name: &str) -> Result<(String, String), Error> {
    let items = match Value::from(input) {
        Value::Array(items) => items,
        other => {
            return Err(Error::str(format!(
                "{name} - expected [input, regex], got: {other}"
            )))
        }
    };
    if items.len() != 2 {
        return Err(Error::str(format!(
            "{name} - expected [input, regex], got {} element(s)",
            items.len()
        )));
    }
    let mut items = items.into_iter();
    let s = items.next().unwrap_or(Value::Null);
    let re = items.next().unwrap_or(Value::Null);
    match (s, re) {
        (Value::String(s), Value::String(re)) => Ok((s, re)),
        (Value::String(_), re) => Err(Error::str(format!(
            "{name} - regex is not a string: {re}"
        ))),
        (s, _) => Err(Error::str(format!("{name} - input is not a string: {s}"))),
    }
}
