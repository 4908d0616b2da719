//! The exposed method table: `ping`, `interfaces`, `client`,
//! `bind_client`, `unbind_client` and `stats`, dispatched by name and
//! positional argument list.

use kitero_core::Router;
use serde_json::Value;

use crate::protocol::ProtocolError;

fn string_arg(method: &str, args: &[Value], index: usize) -> Result<String, ProtocolError> {
    let raw = args
        .get(index)
        .cloned()
        .ok_or_else(|| ProtocolError::WrongArity {
            method: method.to_string(),
            expected: "more",
            got: args.len(),
        })?;
    serde_json::from_value(raw).map_err(|source| ProtocolError::BadArgument {
        method: method.to_string(),
        index,
        source,
    })
}

/// Invokes `method` against `router` with `args`. The caller holds the
/// router's mutex for the duration of the call, so exactly one RPC
/// executes against it at a time.
pub fn dispatch(router: &mut Router, method: &str, args: Vec<Value>) -> Result<Value, ProtocolError> {
    match method {
        "ping" => Ok(Value::Null),

        "interfaces" => Ok(serde_json::to_value(router.interfaces())
            .expect("Interface is always serializable")),

        "stats" => Ok(serde_json::to_value(router.stats()).expect("InterfaceStats is always serializable")),

        "client" => {
            let client = string_arg(method, &args, 0)?;
            let binding = router.clients().get(&client).cloned();
            Ok(serde_json::to_value(binding).expect("binding tuple is always serializable"))
        }

        "bind_client" => {
            let client = string_arg(method, &args, 0)?;
            let interface = string_arg(method, &args, 1)?;
            let qos = string_arg(method, &args, 2)?;
            // A fourth, optional password argument may be present on the
            // wire; it is accepted and ignored — there is no
            // authentication here beyond passing it through.
            if router.clients().contains_key(&client) {
                router.unbind(&client)?;
            }
            router.bind(&client, &interface, &qos)?;
            Ok(Value::Null)
        }

        "unbind_client" => {
            let client = string_arg(method, &args, 0)?;
            router.unbind(&client)?;
            Ok(Value::Null)
        }

        other => Err(ProtocolError::NotExported(other.to_string())),
    }
}
