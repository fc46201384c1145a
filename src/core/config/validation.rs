use serde_json::{Map, Value};

use crate::core::errors::RagError;

/// Checks the user-supplied part of the config before it is merged over defaults.
pub fn validate_config(config: &Value) -> Result<(), RagError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(rag) = expect_optional_object(root, "rag")? {
        validate_u64_field(rag, "rag.n_results", "n_results", 1, 100)?;
        validate_f64_field(rag, "rag.min_similarity", "min_similarity", -1.0, 1.0)?;
    }

    for name in ["generation", "embedding"] {
        if let Some(server) = expect_optional_object(root, name)? {
            validate_server_section(server, name)?;
            validate_u64_field(
                server,
                &format!("{}.max_tokens", name),
                "max_tokens",
                1,
                131_072,
            )?;
            validate_f64_field(
                server,
                &format!("{}.temperature", name),
                "temperature",
                0.0,
                2.0,
            )?;
            validate_u64_field(
                server,
                &format!("{}.dimension", name),
                "dimension",
                1,
                16_384,
            )?;
            validate_i64_field(
                server,
                &format!("{}.n_gpu_layers", name),
                "n_gpu_layers",
                -1,
                1_000,
            )?;
        }
    }

    if let Some(speech) = expect_optional_object(root, "speech")? {
        validate_server_section(speech, "speech")?;
        validate_optional_string_field(speech, "speech.language", "language")?;
        validate_u64_field(speech, "speech.sample_rate", "sample_rate", 8_000, 48_000)?;
        validate_u64_field(speech, "speech.buffer_length", "buffer_length", 1, 480_000)?;
        validate_u64_field(speech, "speech.step_ms", "step_ms", 100, 30_000)?;
        validate_u64_field(speech, "speech.max_window_secs", "max_window_secs", 1, 300)?;
        validate_u64_field(
            speech,
            "speech.ingest_capacity",
            "ingest_capacity",
            1,
            65_536,
        )?;
    }

    Ok(())
}

fn validate_server_section(section: &Map<String, Value>, name: &str) -> Result<(), RagError> {
    validate_optional_string_field(section, &format!("{}.binary", name), "binary")?;
    validate_optional_string_field(section, &format!("{}.model_path", name), "model_path")?;
    validate_u64_field(section, &format!("{}.port", name), "port", 1, 65_535)?;
    validate_u64_field(
        section,
        &format!("{}.startup_timeout_secs", name),
        "startup_timeout_secs",
        1,
        3_600,
    )?;
    validate_u64_field(section, &format!("{}.n_ctx", name), "n_ctx", 16, 1_048_576)
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, RagError> {
    match root.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "non-negative integer"));
    };
    if number < min || number > max {
        return Err(RagError::Config(format!(
            "'{}' must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_i64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: i64,
    max: i64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_i64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(RagError::Config(format!(
            "'{}' must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !(min..=max).contains(&number) {
        return Err(RagError::Config(format!(
            "'{}' must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), RagError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn config_type_error(path: &str, expected: &str) -> RagError {
    RagError::Config(format!("'{}' must be {}", path, expected))
}
