use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use arclog::{ConflictError, Encoder, HandlerError, TypeKey, handler_fn};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

// --- Registration ---

struct Celsius(f64);

#[test]
fn registered_handler_is_used() {
    let encoder = Encoder::new();
    encoder
        .register(|c: &Celsius, _| Ok(json!({"celsius": c.0})))
        .unwrap();
    assert!(encoder.is_registered::<Celsius>());
    assert_eq!(encoder.encode(&Celsius(21.5)), json!({"celsius": 21.5}));
}

#[test]
fn double_registration_conflicts() {
    let encoder = Encoder::new();
    encoder.register(|c: &Celsius, _| Ok(json!(c.0))).unwrap();

    let err = encoder
        .register(|_: &Celsius, _| Ok(json!("second")))
        .unwrap_err();
    assert_eq!(
        err,
        ConflictError {
            key: TypeKey::of::<Celsius>()
        }
    );
    // The first handler is still in place.
    assert_eq!(encoder.encode(&Celsius(1.0)), json!(1.0));
}

#[test]
fn builtin_types_conflict_too() {
    let encoder = Encoder::new();
    let result = encoder.register(|_: &String, _| Ok(json!("redacted")));
    assert!(result.is_err());
    assert_eq!(encoder.encode(&String::from("kept")), json!("kept"));
}

#[test]
fn override_replaces_handler_after_first_use() {
    let encoder = Encoder::new();
    assert_eq!(encoder.encode(&String::from("secret")), json!("secret"));

    let replaced = encoder.register_override(|_: &String, _| Ok(json!("***")));
    assert!(replaced);
    assert_eq!(encoder.encode(&String::from("secret")), json!("***"));
}

#[test]
fn override_of_unregistered_type_reports_no_replacement() {
    let encoder = Encoder::new();
    assert!(!encoder.register_override(|c: &Celsius, _| Ok(json!(c.0))));
    assert!(encoder.register_override(|c: &Celsius, _| Ok(json!(c.0 + 1.0))));
    assert_eq!(encoder.encode(&Celsius(1.0)), json!(2.0));
}

#[test]
fn erased_registration() {
    let encoder = Encoder::empty();
    let handler = handler_fn(|c: &Celsius, _| Ok(json!(c.0)));
    let key = TypeKey::of::<Celsius>();

    assert_eq!(encoder.register_handler(key, Arc::clone(&handler), false), Ok(false));
    assert!(encoder.register_handler(key, Arc::clone(&handler), false).is_err());
    assert_eq!(encoder.register_handler(key, handler, true), Ok(true));
    assert_eq!(encoder.registered_types(), vec![key]);
}

// --- Ancestor-chain resolution ---

struct RequestId(Uuid);
struct TraceId(RequestId);
struct Unrelated;

#[test]
fn unregistered_child_uses_ancestor_handler() {
    let encoder = Encoder::new();
    encoder.declare_ancestor::<RequestId, Uuid>(|r| &r.0);

    let id = RequestId(Uuid::nil());
    assert_eq!(
        encoder.encode(&id),
        json!("00000000-0000-0000-0000-000000000000")
    );
    assert_eq!(encoder.resolves_to::<RequestId>(), Some(TypeKey::of::<Uuid>()));
}

#[test]
fn nearest_registered_ancestor_wins() {
    let encoder = Encoder::new();
    encoder.declare_ancestor::<RequestId, Uuid>(|r| &r.0);
    encoder.declare_ancestor::<TraceId, RequestId>(|t| &t.0);

    // Grandparent handler through two projections.
    assert_eq!(
        encoder.encode(&TraceId(RequestId(Uuid::nil()))),
        json!("00000000-0000-0000-0000-000000000000")
    );

    // Registering the parent makes it the nearest.
    encoder
        .register(|_: &RequestId, _| Ok(json!("request")))
        .unwrap();
    assert_eq!(encoder.encode(&TraceId(RequestId(Uuid::nil()))), json!("request"));
    assert_eq!(encoder.resolves_to::<TraceId>(), Some(TypeKey::of::<RequestId>()));
}

struct Both {
    name: String,
    count: u32,
}

#[test]
fn sibling_ancestors_resolve_in_declaration_order() {
    let encoder = Encoder::new();
    encoder.declare_ancestor::<Both, String>(|b| &b.name);
    encoder.declare_ancestor::<Both, u32>(|b| &b.count);

    let value = Both {
        name: "first".into(),
        count: 2,
    };
    assert_eq!(encoder.encode(&value), json!("first"));
}

#[test]
fn redeclaring_an_ancestor_replaces_the_projection() {
    let encoder = Encoder::new();
    encoder.declare_ancestor::<Both, String>(|_| &EMPTY);
    encoder.declare_ancestor::<Both, String>(|b| &b.name);

    let value = Both {
        name: "real".into(),
        count: 0,
    };
    assert_eq!(encoder.encode(&value), json!("real"));
}

static EMPTY: String = String::new();

#[test]
fn ancestor_cycles_terminate() {
    struct A(Box<B>);
    struct B(Option<A>);

    let encoder = Encoder::empty();
    encoder.declare_ancestor::<A, B>(|a| &a.0);
    fn b_to_a(b: &B) -> &A {
        match &b.0 {
            Some(a) => a,
            None => unreachable!("never projected: no handler in the cycle"),
        }
    }
    encoder.declare_ancestor::<B, A>(b_to_a);

    assert_eq!(encoder.resolves_to::<A>(), None);
    let text = encoder.encode(&A(Box::new(B(None))));
    assert!(text.as_str().unwrap().ends_with("A>"));
}

#[test]
fn unregistered_type_without_ancestors_uses_default() {
    let encoder = Encoder::new();
    assert_eq!(encoder.resolves_to::<Unrelated>(), None);
    assert!(encoder.encode(&Unrelated).is_string());
}

#[test]
fn custom_default_handler() {
    let encoder = Encoder::new();
    encoder.set_default(|_: &dyn Any, cx| Ok(json!({"unencodable": cx.type_name()})));
    let encoded = encoder.encode(&Unrelated);
    assert!(
        encoded["unencodable"]
            .as_str()
            .unwrap()
            .ends_with("Unrelated")
    );
}

// --- Helper registrations ---

#[derive(Serialize)]
struct LoginEvent {
    user: String,
    attempts: u8,
    ratio: f64,
}

#[test]
fn serialize_registration_gives_struct_shape() {
    let encoder = Encoder::new();
    encoder.register_serialize::<LoginEvent>().unwrap();
    let encoded = encoder.encode(&LoginEvent {
        user: "ada".into(),
        attempts: 2,
        ratio: f64::NAN,
    });
    assert_eq!(encoded, json!({"user": "ada", "attempts": 2, "ratio": null}));
    let keys: Vec<_> = encoded.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys, ["user", "attempts", "ratio"]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Level {
    Info,
    Warn,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => f.write_str("info"),
            Level::Warn => f.write_str("warn"),
        }
    }
}

#[test]
fn display_registration() {
    let encoder = Encoder::new();
    encoder.register_display::<Level>().unwrap();
    assert_eq!(encoder.encode(&Level::Warn), json!("warn"));
    assert!(encoder.register_display::<Level>().is_err());
}

#[test]
fn container_registrations_for_caller_types() {
    let encoder = Encoder::new();
    encoder.register_display::<Level>().unwrap();
    encoder.register_sequence::<Vec<Level>, Level>().unwrap();
    encoder
        .register_mapping::<BTreeMap<Level, u32>, Level, u32>()
        .unwrap();
    encoder.register_optional::<Level>().unwrap();

    assert_eq!(
        encoder.encode(&vec![Level::Info, Level::Warn]),
        json!(["info", "warn"])
    );
    let counts: BTreeMap<Level, u32> = [(Level::Warn, 2), (Level::Info, 5)].into();
    assert_eq!(encoder.encode(&counts), json!({"info": 5, "warn": 2}));
    assert_eq!(encoder.encode(&Some(Level::Info)), json!("info"));
    assert_eq!(encoder.encode(&None::<Level>), Value::Null);
}

#[test]
fn tuple_registration_for_caller_types() {
    let encoder = Encoder::new();
    encoder.register_display::<Level>().unwrap();
    encoder.register(|c: &Celsius, _| Ok(json!(c.0))).unwrap();
    encoder.register_tuple::<(Level, u16, Celsius)>().unwrap();

    assert_eq!(
        encoder.encode(&(Level::Warn, 503_u16, Celsius(-4.0))),
        json!(["warn", 503, -4.0])
    );
    // Pairs of common scalars are built in.
    assert!(encoder.register_tuple::<(String, i64)>().is_err());
}

#[test]
fn handlers_recurse_through_context() {
    struct Span {
        name: &'static str,
        tags: Vec<String>,
    }

    let encoder = Encoder::new();
    encoder
        .register(|s: &Span, cx| {
            Ok(json!({
                "name": cx.encode(&s.name),
                "tags": cx.encode(&s.tags),
                "depth": cx.depth(),
            }))
        })
        .unwrap();

    let span = Span {
        name: "db.query",
        tags: vec!["slow".into()],
    };
    assert_eq!(
        encoder.encode(&span),
        json!({"name": "db.query", "tags": ["slow"], "depth": 0})
    );
}

#[test]
fn handler_can_return_typed_errors() {
    let encoder = Encoder::new();
    encoder
        .register(|c: &Celsius, _| {
            if c.0 < -273.15 {
                return Err(HandlerError::Unsupported(format!("{} below absolute zero", c.0)));
            }
            Ok(json!(c.0))
        })
        .unwrap();
    assert_eq!(encoder.encode(&Celsius(0.0)), json!(0.0));
    assert_eq!(encoder.encode(&Celsius(-300.0))["kind"], json!("HandlerError"));
}

#[test]
fn instances_are_isolated() {
    let a = Encoder::new();
    let b = Encoder::new();
    a.register(|_: &Celsius, _| Ok(json!("a"))).unwrap();
    assert!(a.is_registered::<Celsius>());
    assert!(!b.is_registered::<Celsius>());
    assert!(b.register(|_: &Celsius, _| Ok(json!("b"))).is_ok());
}
