//! Parameter validation.
//!
//! A primitive validator is a `{ test, error }` pair looked up by type
//! name. Compound types written `a|b` accept a value that any alternative
//! accepts. Object schemas declare per-property types plus strictness
//! knobs (reject unexpected keys, strip unknown keys, require at least one
//! key). Every rejection maps onto `-32602` with the parameter location
//! and offending value in the message.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use mirrorgate_common::error::RpcError;
use mirrorgate_common::utils::{is_bounded_hex, is_hex_bytes, is_hex_quantity};

pub struct PrimitiveValidator {
    pub test: fn(&Value) -> bool,
    pub error: &'static str,
}

const BLOCK_TAGS: &[&str] = &["earliest", "latest", "pending", "safe", "finalized"];

static TRANSACTION_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d\.\d\.\d{1,10}-\d{1,19}-\d{1,9}$").expect("static regex")
});

fn as_str(value: &Value) -> Option<&str> {
    value.as_str()
}

fn test_boolean(value: &Value) -> bool {
    value.is_boolean()
}

fn test_hex(value: &Value) -> bool {
    as_str(value).is_some_and(is_hex_quantity)
}

fn test_hex_even(value: &Value) -> bool {
    as_str(value).is_some_and(|s| is_hex_quantity(s) && (s.len() - 2) % 2 == 0)
}

fn test_hex64(value: &Value) -> bool {
    as_str(value).is_some_and(|s| is_bounded_hex(s, 64))
}

fn test_address(value: &Value) -> bool {
    as_str(value).is_some_and(|s| is_hex_bytes(s, 20))
}

fn test_address_filter(value: &Value) -> bool {
    match value {
        Value::Array(items) => !items.is_empty() && items.iter().all(test_address),
        other => test_address(other),
    }
}

fn test_topic_hash(value: &Value) -> bool {
    value.is_null() || as_str(value).is_some_and(|s| is_hex_bytes(s, 32))
}

fn test_topics(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(|item| match item {
            Value::Array(nested) => nested.iter().all(test_topic_hash),
            other => test_topic_hash(other),
        }),
        _ => false,
    }
}

fn test_block_hash(value: &Value) -> bool {
    as_str(value).is_some_and(|s| is_hex_bytes(s, 32))
}

fn test_block_number(value: &Value) -> bool {
    as_str(value).is_some_and(|s| BLOCK_TAGS.contains(&s) || is_bounded_hex(s, 16))
}

fn test_block_params(value: &Value) -> bool {
    if test_block_number(value) || test_block_hash(value) {
        return true;
    }
    // Single-key object form: { blockHash } or { blockNumber }.
    match value.as_object() {
        Some(map) if map.len() == 1 => match map.iter().next() {
            Some((key, v)) if key == "blockHash" => test_block_hash(v),
            Some((key, v)) if key == "blockNumber" => test_block_number(v),
            _ => false,
        },
        _ => false,
    }
}

fn test_transaction_hash(value: &Value) -> bool {
    as_str(value).is_some_and(|s| is_hex_bytes(s, 32))
}

fn test_transaction_id(value: &Value) -> bool {
    as_str(value).is_some_and(|s| TRANSACTION_ID_RE.is_match(s))
}

fn test_tracer_type(value: &Value) -> bool {
    matches!(as_str(value), Some("callTracer") | Some("opcodeLogger"))
}

fn test_transaction_object(value: &Value) -> bool {
    TRANSACTION_SCHEMA.validate("transaction", &mut value.clone()).is_ok()
}

fn test_filter_object(value: &Value) -> bool {
    validate_filter_object("filter", &mut value.clone()).is_ok()
}

fn test_call_tracer_config(value: &Value) -> bool {
    CALL_TRACER_CONFIG_SCHEMA.validate("tracerConfig", &mut value.clone()).is_ok()
}

fn test_opcode_logger_config(value: &Value) -> bool {
    OPCODE_LOGGER_CONFIG_SCHEMA.validate("tracerConfig", &mut value.clone()).is_ok()
}

static PRIMITIVES: LazyLock<HashMap<&'static str, PrimitiveValidator>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, PrimitiveValidator> = HashMap::new();
    let mut add = |name: &'static str, test: fn(&Value) -> bool, error: &'static str| {
        table.insert(name, PrimitiveValidator { test, error });
    };

    add("boolean", test_boolean, "Expected boolean");
    add("hex", test_hex, "Expected 0x prefixed hexadecimal value");
    add(
        "hexEvenLength",
        test_hex_even,
        "Expected 0x prefixed hexadecimal value with even length",
    );
    add(
        "hex64",
        test_hex64,
        "Expected 0x prefixed hexadecimal value of at most 64 digits",
    );
    add("address", test_address, "Expected 0x prefixed 20-byte address");
    add(
        "addressFilter",
        test_address_filter,
        "Expected 0x prefixed 20-byte address or a non-empty array of addresses",
    );
    add(
        "topicHash",
        test_topic_hash,
        "Expected 0x prefixed 32-byte topic hash or null",
    );
    add(
        "topics",
        test_topics,
        "Expected an array of 32-byte topic hashes (nested arrays allowed)",
    );
    add("blockHash", test_block_hash, "Expected 0x prefixed 32-byte block hash");
    add(
        "blockNumber",
        test_block_number,
        "Expected 0x prefixed hexadecimal block number or tag (earliest, latest, pending, safe, finalized)",
    );
    add(
        "blockParams",
        test_block_params,
        "Expected a block number, a block hash, or an object with a single blockHash or blockNumber key",
    );
    add(
        "transactionHash",
        test_transaction_hash,
        "Expected 0x prefixed 32-byte transaction hash",
    );
    add(
        "transactionId",
        test_transaction_id,
        "Expected a transaction id in shard.realm.num-sss-nnn format",
    );
    add("transactionObject", test_transaction_object, "Expected a transaction object");
    add("filterObject", test_filter_object, "Expected a filter object");
    add(
        "tracerType",
        test_tracer_type,
        "Expected tracer type callTracer or opcodeLogger",
    );
    add(
        "callTracerConfig",
        test_call_tracer_config,
        "Expected a call tracer config object",
    );
    add(
        "opcodeLoggerConfig",
        test_opcode_logger_config,
        "Expected an opcode logger config object",
    );

    table
});

/// Property declaration inside an object schema.
pub struct PropertySpec {
    pub type_spec: &'static str,
    pub nullable: bool,
    pub required: bool,
}

impl PropertySpec {
    const fn of(type_spec: &'static str) -> Self {
        Self { type_spec, nullable: false, required: false }
    }

    const fn nullable(type_spec: &'static str) -> Self {
        Self { type_spec, nullable: true, required: false }
    }

    const fn required(type_spec: &'static str) -> Self {
        Self { type_spec, nullable: false, required: true }
    }
}

pub struct ObjectSchema {
    pub name: &'static str,
    pub properties: &'static [(&'static str, PropertySpec)],
    pub fail_on_unexpected: bool,
    pub fail_on_empty: bool,
    pub delete_unknown: bool,
}

impl ObjectSchema {
    fn declared(&self, key: &str) -> bool {
        self.properties.iter().any(|(name, _)| *name == key)
    }

    pub fn validate(&self, location: &str, value: &mut Value) -> Result<(), RpcError> {
        let Some(map) = value.as_object_mut() else {
            return Err(RpcError::invalid_parameter(
                location,
                &format!("expected a {} object", self.name),
                value,
            ));
        };

        if self.fail_on_unexpected {
            if let Some(unexpected) = map.keys().find(|k| !self.declared(k)) {
                return Err(RpcError::unexpected_parameter(&format!(
                    "'{unexpected}' for {}",
                    self.name
                )));
            }
        } else if self.delete_unknown {
            let declared: Vec<&str> =
                self.properties.iter().map(|(name, _)| *name).collect();
            map.retain(|k, _| declared.contains(&k.as_str()));
        }

        for (key, spec) in self.properties {
            let property_location = format!("'{key}' for {}", self.name);
            match map.get_mut(*key) {
                None => {
                    if spec.required {
                        return Err(RpcError::missing_required_parameter(&property_location));
                    }
                }
                Some(Value::Null) => {
                    if !spec.nullable {
                        return Err(RpcError::invalid_parameter(
                            &property_location,
                            "must not be null",
                            &Value::Null,
                        ));
                    }
                }
                Some(v) => validate_value(&property_location, v, spec.type_spec)?,
            }
        }

        if self.fail_on_empty && !self.properties.iter().any(|(key, _)| map.contains_key(*key)) {
            return Err(RpcError::invalid_params(format!(
                "At least one property is required for {}",
                self.name
            )));
        }

        Ok(())
    }
}

pub static TRANSACTION_SCHEMA: ObjectSchema = ObjectSchema {
    name: "transaction",
    properties: &[
        ("from", PropertySpec::of("address")),
        ("to", PropertySpec::nullable("address")),
        ("gas", PropertySpec::of("hex")),
        ("gasPrice", PropertySpec::of("hex")),
        ("maxFeePerGas", PropertySpec::of("hex")),
        ("maxPriorityFeePerGas", PropertySpec::of("hex")),
        ("value", PropertySpec::of("hex")),
        ("data", PropertySpec::nullable("hexEvenLength")),
        ("input", PropertySpec::nullable("hexEvenLength")),
        ("nonce", PropertySpec::of("hex")),
        ("chainId", PropertySpec::of("hex")),
        ("type", PropertySpec::of("hex")),
    ],
    fail_on_unexpected: false,
    fail_on_empty: false,
    delete_unknown: true,
};

pub static FILTER_SCHEMA: ObjectSchema = ObjectSchema {
    name: "filter",
    properties: &[
        ("fromBlock", PropertySpec::of("blockNumber")),
        ("toBlock", PropertySpec::of("blockNumber")),
        ("blockHash", PropertySpec::of("blockHash")),
        ("address", PropertySpec::of("addressFilter")),
        ("topics", PropertySpec::of("topics")),
    ],
    fail_on_unexpected: true,
    fail_on_empty: false,
    delete_unknown: false,
};

pub static CALL_TRACER_CONFIG_SCHEMA: ObjectSchema = ObjectSchema {
    name: "callTracerConfig",
    properties: &[("onlyTopCall", PropertySpec::nullable("boolean"))],
    fail_on_unexpected: true,
    fail_on_empty: false,
    delete_unknown: false,
};

pub static OPCODE_LOGGER_CONFIG_SCHEMA: ObjectSchema = ObjectSchema {
    name: "opcodeLoggerConfig",
    properties: &[
        ("enableMemory", PropertySpec::nullable("boolean")),
        ("disableStack", PropertySpec::nullable("boolean")),
        ("disableStorage", PropertySpec::nullable("boolean")),
    ],
    fail_on_unexpected: true,
    fail_on_empty: false,
    delete_unknown: false,
};

pub static TRACER_CONFIG_WRAPPER_SCHEMA: ObjectSchema = ObjectSchema {
    name: "tracerConfigWrapper",
    properties: &[
        ("tracer", PropertySpec::nullable("tracerType")),
        ("tracerConfig", PropertySpec::nullable("callTracerConfig|opcodeLoggerConfig")),
    ],
    fail_on_unexpected: true,
    fail_on_empty: false,
    delete_unknown: false,
};

/// `blockHash` pins the filter to one block and cannot be combined with a
/// range.
pub fn validate_filter_object(location: &str, value: &mut Value) -> Result<(), RpcError> {
    FILTER_SCHEMA.validate(location, value)?;
    if let Some(map) = value.as_object() {
        if map.contains_key("blockHash")
            && (map.contains_key("fromBlock") || map.contains_key("toBlock"))
        {
            return Err(RpcError::invalid_params(
                "Can't use both blockHash and toBlock/fromBlock",
            ));
        }
    }
    Ok(())
}

/// The wrapper must carry at least one of `tracer` / `tracerConfig`.
pub fn validate_tracer_config_wrapper(
    location: &str,
    value: &mut Value,
) -> Result<(), RpcError> {
    TRACER_CONFIG_WRAPPER_SCHEMA.validate(location, value)?;
    if let Some(map) = value.as_object() {
        if !map.contains_key("tracer") && !map.contains_key("tracerConfig") {
            return Err(RpcError::invalid_params(
                "tracerConfigWrapper requires at least one of tracer or tracerConfig",
            ));
        }
    }
    Ok(())
}

fn passes(value: &Value, type_spec: &str) -> bool {
    match type_spec {
        "filterObject" => test_filter_object(value),
        "transactionObject" => test_transaction_object(value),
        "tracerConfigWrapper" => {
            validate_tracer_config_wrapper("_", &mut value.clone()).is_ok()
        }
        name => PRIMITIVES.get(name).is_some_and(|p| (p.test)(value)),
    }
}

fn expected_text(type_spec: &str) -> &'static str {
    PRIMITIVES
        .get(type_spec)
        .map(|p| p.error)
        .unwrap_or("Expected a valid value")
}

/// Validate `value` at `location` against a type spec. Compound specs
/// (`a|b`) accept the value when any alternative does; the failure message
/// names every alternative. Object specs run their schema so failures
/// carry the precise property location.
pub fn validate_value(
    location: &str,
    value: &mut Value,
    type_spec: &str,
) -> Result<(), RpcError> {
    if type_spec.contains('|') {
        if type_spec.split('|').any(|alt| passes(value, alt)) {
            return Ok(());
        }
        let expectations: Vec<&str> = type_spec.split('|').map(expected_text).collect();
        return Err(RpcError::invalid_parameter(
            location,
            &expectations.join(" OR "),
            value,
        ));
    }

    match type_spec {
        "transactionObject" => TRANSACTION_SCHEMA.validate(location, value),
        "filterObject" => validate_filter_object(location, value),
        "tracerConfigWrapper" => validate_tracer_config_wrapper(location, value),
        name => {
            let validator = PRIMITIVES
                .get(name)
                .unwrap_or_else(|| panic!("unknown validator type '{name}'"));
            if (validator.test)(value) {
                Ok(())
            } else {
                Err(RpcError::invalid_parameter(location, validator.error, value))
            }
        }
    }
}
