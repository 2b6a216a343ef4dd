//! Built-in handlers installed by [`Encoder::new`](crate::Encoder::new).
//!
//! Generic containers are keyed by their concrete instantiation, so the
//! common element, key and value types are registered up front. Other
//! instantiations can be added with `Encoder::register_sequence`,
//! `register_mapping` and `register_optional`.

use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeDelta,
    Utc,
};
use indexmap::IndexMap;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use regex::{Match, Regex};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::BytesEncoding;
use crate::encoder::Registry;
use crate::error::HandlerError;
use crate::handler::{self, EncodeContext, handler_fn};
use crate::lineage::TypeKey;
use crate::value::{self, AnyValue};

pub(crate) fn install(registry: &mut Registry) {
    text(registry);
    numbers(registry);
    scalars(registry);
    dynamic(registry);
    collections(registry);
    // After collections: Vec<u8> and [u8; N] are byte buffers, not sequences.
    bytes(registry);
    time(registry);
    errors(registry);
    identifiers(registry);
    patterns(registry);
}

macro_rules! put {
    ($registry:ident, $t:ty, $f:expr) => {
        $registry.put(TypeKey::of::<$t>(), handler_fn::<$t, _>($f));
    };
}

// ----------------------------------- Text -----------------------------------

fn text(registry: &mut Registry) {
    put!(registry, String, |s, _| Ok(Value::String(s.clone())));
    put!(registry, &'static str, |s, _| Ok(Value::String((*s).to_owned())));
    put!(registry, Box<str>, |s, _| Ok(Value::String(s.to_string())));
    put!(registry, Arc<str>, |s, _| Ok(Value::String(s.to_string())));
    put!(registry, Cow<'static, str>, |s, _| Ok(Value::String(s.to_string())));
    put!(registry, char, |c, _| Ok(Value::String(c.to_string())));
}

// ---------------------------------- Numbers ---------------------------------

macro_rules! integers {
    ($registry:ident; $($t:ty),* $(,)?) => {$(
        put!($registry, $t, |n, _| Ok(Value::from(*n)));
    )*};
}

fn numbers(registry: &mut Registry) {
    integers!(registry; i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
    put!(registry, i128, |n, _| Ok(value::wide_int(*n)));
    put!(registry, u128, |n, _| Ok(value::wide_uint(*n)));
    put!(registry, f32, |n, _| Ok(value::float(f64::from(*n))));
    put!(registry, f64, |n, _| Ok(value::float(*n)));
    put!(registry, Decimal, |d, _| Ok(decimal(d)));
}

/// Integral decimals (scale 0) become integers, the rest floats.
/// Integers outside the 64-bit range keep every digit as a string.
fn decimal(d: &Decimal) -> Value {
    if let (0, Some(n)) = (d.scale(), d.to_i128()) {
        return value::wide_int(n);
    }
    match d.to_f64() {
        Some(f) => value::float(f),
        None => Value::String(d.to_string()),
    }
}

// ---------------------------- Booleans, null, JSON ---------------------------

fn scalars(registry: &mut Registry) {
    put!(registry, bool, |b, _| Ok(Value::Bool(*b)));
    put!(registry, (), |_, _| Ok(Value::Null));
    // Already encoded: pass through untouched.
    put!(registry, Value, |v, _| Ok(v.clone()));
    put!(registry, Map<String, Value>, |m, _| Ok(Value::Object(m.clone())));
    put!(registry, TypeKey, |k, _| Ok(Value::String(k.name().to_owned())));
}

// ------------------------------ Type-erased boxes ----------------------------

fn dynamic(registry: &mut Registry) {
    put!(registry, AnyValue, |v, cx| Ok(cx.encode_dyn(&**v)));
    put!(registry, Box<dyn Any>, |v, cx| Ok(cx.encode_dyn(&**v)));
    put!(registry, Arc<dyn Any + Send + Sync>, |v, cx| Ok(cx.encode_dyn(&**v)));
}

// ----------------------------------- Bytes ----------------------------------

fn bytes(registry: &mut Registry) {
    put!(registry, Vec<u8>, |b, cx| Ok(encode_bytes(b, cx)));
    put!(registry, Box<[u8]>, |b, cx| Ok(encode_bytes(b, cx)));
    put!(registry, &'static [u8], |b, cx| Ok(encode_bytes(b, cx)));

    macro_rules! byte_arrays {
        ($($n:literal)*) => {$(
            put!(registry, [u8; $n], |b, cx| Ok(encode_bytes(b, cx)));
        )*};
    }
    byte_arrays!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31 32);
}

fn encode_bytes(bytes: &[u8], cx: &EncodeContext<'_>) -> Value {
    match cx.config().bytes {
        BytesEncoding::Base64Url => Value::String(URL_SAFE.encode(bytes)),
        BytesEncoding::Base64 => Value::String(STANDARD.encode(bytes)),
        BytesEncoding::Array => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

// ----------------------------------- Time -----------------------------------

fn time(registry: &mut Registry) {
    put!(registry, DateTime<Utc>, |dt, _| Ok(Value::String(rfc3339(dt))));
    put!(registry, DateTime<FixedOffset>, |dt, _| Ok(Value::String(rfc3339(dt))));
    put!(registry, DateTime<Local>, |dt, _| Ok(Value::String(rfc3339(dt))));
    put!(registry, SystemTime, |t, _| system_time(t));
    put!(registry, NaiveDateTime, |dt, _| {
        Ok(Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
    });
    put!(registry, NaiveDate, |d, _| Ok(Value::String(d.format("%Y-%m-%d").to_string())));
    put!(registry, NaiveTime, |t, _| Ok(Value::String(t.format("%H:%M:%S%.f").to_string())));
    put!(registry, Duration, |d, _| Ok(value::float(d.as_secs_f64())));
    // subsec_nanos carries the sign of the delta: -1.5s is -1s and -500ms.
    put!(registry, TimeDelta, |d, _| {
        let secs = d.num_seconds() as f64 + f64::from(d.subsec_nanos()) / 1e9;
        Ok(value::float(secs))
    });
    registry.put(TypeKey::of::<Utc>(), handler::display_handler::<Utc>());
    registry.put(TypeKey::of::<FixedOffset>(), handler::display_handler::<FixedOffset>());
}

/// `SystemTime` as UTC, without chrono's panicking `From` conversion.
fn system_time(t: &SystemTime) -> Result<Value, HandlerError> {
    let utc = match t.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_secs())
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, since.subsec_nanos())),
        Err(before) => {
            let before = before.duration();
            i64::try_from(before.as_secs()).ok().and_then(|secs| {
                match before.subsec_nanos() {
                    0 => DateTime::from_timestamp(-secs, 0),
                    nanos => DateTime::from_timestamp(-secs - 1, 1_000_000_000 - nanos),
                }
            })
        }
    };
    match utc {
        Some(dt) => Ok(Value::String(rfc3339(&dt))),
        None => Err(HandlerError::Unsupported(format!(
            "{t:?} is outside the representable datetime range"
        ))),
    }
}

/// ISO-8601 with an explicit offset (`+00:00`, never `Z`), fractional
/// seconds only when present.
fn rfc3339<Tz>(dt: &DateTime<Tz>) -> String
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

// ---------------------------------- Errors ----------------------------------

fn errors(registry: &mut Registry) {
    put!(registry, std::io::Error, |e, _| {
        Ok(value::error_shape(&format!("{:?}", e.kind()), e))
    });
    put!(registry, Box<dyn std::error::Error + Send + Sync>, |e, _| {
        Ok(value::error_shape("Error", &**e))
    });
    put!(registry, Box<dyn std::error::Error>, |e, _| {
        Ok(value::error_shape("Error", &**e))
    });
}

// -------------------------------- Identifiers -------------------------------

fn identifiers(registry: &mut Registry) {
    put!(registry, Uuid, |u, _| Ok(Value::String(u.hyphenated().to_string())));
    registry.put(TypeKey::of::<IpAddr>(), handler::display_handler::<IpAddr>());
    registry.put(TypeKey::of::<Ipv4Addr>(), handler::display_handler::<Ipv4Addr>());
    registry.put(TypeKey::of::<Ipv6Addr>(), handler::display_handler::<Ipv6Addr>());
    registry.put(TypeKey::of::<SocketAddr>(), handler::display_handler::<SocketAddr>());
    registry.put(TypeKey::of::<SocketAddrV4>(), handler::display_handler::<SocketAddrV4>());
    registry.put(TypeKey::of::<SocketAddrV6>(), handler::display_handler::<SocketAddrV6>());
    put!(registry, PathBuf, |p, _| Ok(Value::String(p.to_string_lossy().into_owned())));
    put!(registry, &'static Path, |p, _| {
        Ok(Value::String(p.to_string_lossy().into_owned()))
    });
    registry.put(TypeKey::of::<IpNet>(), handler::display_handler::<IpNet>());
    registry.put(TypeKey::of::<Ipv4Net>(), handler::display_handler::<Ipv4Net>());
    registry.put(TypeKey::of::<Ipv6Net>(), handler::display_handler::<Ipv6Net>());
}

// --------------------------------- Patterns ---------------------------------

fn patterns(registry: &mut Registry) {
    put!(registry, Regex, |re, _| Ok(Value::String(re.as_str().to_owned())));
    put!(registry, regex::bytes::Regex, |re, _| {
        Ok(Value::String(re.as_str().to_owned()))
    });
    put!(registry, Match<'static>, |m, _| {
        let mut shape = Map::new();
        shape.insert("text".to_owned(), Value::String(m.as_str().to_owned()));
        shape.insert("start".to_owned(), Value::from(m.start()));
        shape.insert("end".to_owned(), Value::from(m.end()));
        Ok(Value::Object(shape))
    });
}

// -------------------------------- Collections -------------------------------

fn sequence<C, T>(registry: &mut Registry)
where
    C: Any,
    T: Any,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
{
    registry.put(TypeKey::of::<C>(), handler::sequence_handler::<C, T>());
}

fn optional<T: Any>(registry: &mut Registry) {
    registry.put(TypeKey::of::<Option<T>>(), handler::optional_handler::<T>());
}

/// `Vec`, `VecDeque` and `Option` of `T`, plus one nested layer of each.
fn sequence_family<T: Any>(registry: &mut Registry) {
    sequence::<Vec<T>, T>(registry);
    sequence::<VecDeque<T>, T>(registry);
    optional::<T>(registry);
    sequence::<Vec<Vec<T>>, Vec<T>>(registry);
    sequence::<Vec<Option<T>>, Option<T>>(registry);
    optional::<Vec<T>>(registry);
}

fn arrays<T: Any>(registry: &mut Registry) {
    macro_rules! lengths {
        ($($n:literal)*) => {$(
            sequence::<[T; $n], T>(registry);
        )*};
    }
    lengths!(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31 32);
}

/// `IndexMap`, `BTreeMap` and `HashMap` from `K` to `V`.
fn mapping<K: Any, V: Any>(registry: &mut Registry) {
    registry.put(
        TypeKey::of::<IndexMap<K, V>>(),
        handler::mapping_handler::<IndexMap<K, V>, K, V>(),
    );
    registry.put(
        TypeKey::of::<BTreeMap<K, V>>(),
        handler::mapping_handler::<BTreeMap<K, V>, K, V>(),
    );
    registry.put(
        TypeKey::of::<HashMap<K, V>>(),
        handler::mapping_handler::<HashMap<K, V>, K, V>(),
    );
}

/// Map values: the scalars plus a `Vec` or `Option` of the common ones.
fn mapping_values<K: Any>(registry: &mut Registry) {
    macro_rules! values {
        ($($v:ty),* $(,)?) => {$(
            mapping::<K, $v>(registry);
        )*};
    }
    values!(
        String, &'static str, char, bool,
        i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
        f32, f64, Value, Uuid, DateTime<Utc>, AnyValue,
        Vec<String>, Vec<&'static str>, Vec<bool>, Vec<i32>, Vec<i64>, Vec<u32>, Vec<u64>,
        Vec<f64>, Vec<u8>, Vec<Value>, Vec<AnyValue>,
        Option<String>, Option<&'static str>, Option<bool>, Option<i32>, Option<i64>,
        Option<u32>, Option<u64>, Option<f64>, Option<Value>,
    );
}

macro_rules! pairs {
    (@first $registry:ident; $a:ty; [$($b:ty),* $(,)?]) => {$(
        $registry.put(TypeKey::of::<($a, $b)>(), handler::tuple_handler::<($a, $b)>());
    )*};
    ($registry:ident; [$($a:ty),* $(,)?]; $all:tt) => {$(
        pairs!(@first $registry; $a; $all);
    )*};
}

macro_rules! uniform_tuples {
    ($registry:ident; $($t:ty),* $(,)?) => {$(
        $registry.put(TypeKey::of::<($t, $t, $t)>(), handler::tuple_handler::<($t, $t, $t)>());
        $registry.put(
            TypeKey::of::<($t, $t, $t, $t)>(),
            handler::tuple_handler::<($t, $t, $t, $t)>(),
        );
    )*};
}

fn collections(registry: &mut Registry) {
    macro_rules! elements {
        ($($t:ty),* $(,)?) => {$(
            sequence_family::<$t>(registry);
            arrays::<$t>(registry);
        )*};
    }
    // u8 included: Vec<u8> and [u8; N] are replaced by byte buffers below.
    elements!(
        String, &'static str, char, bool,
        i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
        f32, f64, Value, Uuid, DateTime<Utc>, AnyValue,
    );

    macro_rules! sets {
        ($($t:ty),* $(,)?) => {$(
            sequence::<BTreeSet<$t>, $t>(registry);
            sequence::<HashSet<$t>, $t>(registry);
        )*};
    }
    sets!(String, &'static str, char, bool, i32, i64, u8, u32, u64, usize, Uuid);

    macro_rules! keys {
        ($($k:ty),* $(,)?) => {$(
            mapping_values::<$k>(registry);
        )*};
    }
    keys!(String, &'static str, i32, i64, u32, u64, usize);

    // Lists of records.
    sequence::<Vec<Map<String, Value>>, Map<String, Value>>(registry);
    sequence::<Vec<IndexMap<String, AnyValue>>, IndexMap<String, AnyValue>>(registry);
    sequence::<Vec<BTreeMap<String, AnyValue>>, BTreeMap<String, AnyValue>>(registry);
    sequence::<Vec<HashMap<String, AnyValue>>, HashMap<String, AnyValue>>(registry);
    sequence::<Vec<HashMap<String, String>>, HashMap<String, String>>(registry);

    pairs!(registry;
        [String, &'static str, char, bool, i32, i64, u32, u64, usize, f32, f64, Value, AnyValue];
        [String, &'static str, char, bool, i32, i64, u32, u64, usize, f32, f64, Value, AnyValue]
    );
    uniform_tuples!(registry;
        String, &'static str, char, bool, i32, i64, u32, u64, usize, f32, f64, Value, AnyValue,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decimal_integral_vs_fractional() {
        assert_eq!(decimal(&Decimal::new(42, 0)), json!(42));
        assert_eq!(decimal(&Decimal::new(150, 2)), json!(1.5));
        assert_eq!(
            decimal(&Decimal::from_i128_with_scale(i128::from(i64::MAX) + 1, 0)),
            json!("9223372036854775808")
        );
    }

    #[test]
    fn system_time_never_panics_out_of_range() {
        let far = UNIX_EPOCH + Duration::from_secs(10_000_000_000_000);
        assert!(matches!(system_time(&far), Err(HandlerError::Unsupported(_))));
        let before = UNIX_EPOCH - Duration::from_nanos(1);
        assert_eq!(
            system_time(&before).unwrap(),
            json!("1969-12-31T23:59:59.999999999+00:00")
        );
    }

    #[test]
    fn rfc3339_keeps_numeric_offset() {
        let dt = DateTime::parse_from_rfc3339("2024-03-01T12:30:00+02:00").unwrap();
        assert_eq!(rfc3339(&dt), "2024-03-01T12:30:00+02:00");
        assert_eq!(rfc3339(&dt.with_timezone(&Utc)), "2024-03-01T10:30:00+00:00");
    }
}
