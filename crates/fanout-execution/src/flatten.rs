use std::sync::Arc;

use arrow::json::ReaderBuilder;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::compute::concat_batches;
use datafusion::arrow::datatypes::{DataType, Field, FieldRef, Fields, Schema, SchemaRef};
use log::debug;
use serde_json::{Map, Value};

use crate::error::{ExecutionError, ExecutionResult};

const FLATTEN_BATCH_SIZE: usize = 8192;

/// Infers the output schema from a single JSON row.
///
/// The row must be a JSON object. Every top-level key becomes a nullable field, in the
/// order the keys appear. Other rows are not consulted, so fields that only appear in
/// later rows are not part of the schema.
pub fn infer_schema(sample: &str) -> ExecutionResult<SchemaRef> {
    let value: Value = serde_json::from_str(sample).map_err(|e| {
        ExecutionError::schema_inference(format!("cannot parse sample row: {e}: {sample}"))
    })?;
    let Value::Object(object) = value else {
        return Err(ExecutionError::schema_inference(format!(
            "sample row is not a JSON object: {sample}"
        )));
    };
    Ok(Arc::new(Schema::new(infer_fields(&object))))
}

fn infer_fields(object: &Map<String, Value>) -> Fields {
    object
        .iter()
        .map(|(name, value)| Field::new(name, infer_data_type(value), true))
        .collect()
}

fn infer_data_type(value: &Value) -> DataType {
    match value {
        Value::Null | Value::String(_) => DataType::Utf8,
        Value::Bool(_) => DataType::Boolean,
        Value::Number(n) if n.is_i64() => DataType::Int64,
        Value::Number(_) => DataType::Float64,
        Value::Array(items) => {
            let item = items
                .iter()
                .find(|x| !x.is_null())
                .map(infer_data_type)
                .unwrap_or(DataType::Utf8);
            DataType::List(Arc::new(Field::new("item", item, true)))
        }
        Value::Object(object) if object.is_empty() => DataType::Utf8,
        Value::Object(object) => DataType::Struct(infer_fields(object)),
    }
}

/// Parses every JSON row against the schema and builds a single record batch.
///
/// Keys that are not in the schema are ignored and absent keys become nulls.
/// A value that does not fit its field becomes null, except that string fields
/// hold the JSON text of any value and floating-point fields accept integers.
/// A row that is not a JSON object becomes a row of nulls.
pub fn flatten<S: AsRef<str>>(rows: &[S], schema: SchemaRef) -> ExecutionResult<RecordBatch> {
    let mut decoder = ReaderBuilder::new(schema.clone())
        .with_batch_size(FLATTEN_BATCH_SIZE)
        .build_decoder()?;
    let mut batches = vec![];
    let mut malformed = 0;
    for chunk in rows.chunks(FLATTEN_BATCH_SIZE) {
        let records = chunk
            .iter()
            .map(|row| match serde_json::from_str::<Value>(row.as_ref()) {
                Ok(Value::Object(object)) => conform_object(&object, schema.fields()),
                _ => {
                    malformed += 1;
                    Map::new()
                }
            })
            .collect::<Vec<_>>();
        decoder.serialize(&records)?;
        if let Some(batch) = decoder.flush()? {
            batches.push(batch);
        }
    }
    if malformed > 0 {
        debug!("{malformed} rows could not be parsed as JSON objects");
    }
    Ok(concat_batches(&schema, &batches)?)
}

fn conform_object(object: &Map<String, Value>, fields: &Fields) -> Map<String, Value> {
    fields
        .iter()
        .filter_map(|field| {
            let value = object.get(field.name())?;
            Some((field.name().clone(), conform_value(value, field)))
        })
        .collect()
}

fn conform_value(value: &Value, field: &FieldRef) -> Value {
    match (field.data_type(), value) {
        (_, Value::Null) => Value::Null,
        (DataType::Utf8, Value::String(_)) => value.clone(),
        (DataType::Utf8, _) => Value::String(value.to_string()),
        (DataType::Boolean, Value::Bool(_)) => value.clone(),
        (DataType::Int64, Value::Number(n)) if n.is_i64() => value.clone(),
        (DataType::Float64, Value::Number(_)) => value.clone(),
        (DataType::List(item), Value::Array(items)) => {
            Value::Array(items.iter().map(|x| conform_value(x, item)).collect())
        }
        (DataType::Struct(fields), Value::Object(object)) => {
            Value::Object(conform_object(object, fields))
        }
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use datafusion::arrow::array::{Array, AsArray};
    use datafusion::arrow::datatypes::{Float64Type, Int64Type};

    use super::*;

    #[test]
    fn test_infer_schema() -> ExecutionResult<()> {
        let schema = infer_schema(
            r#"{"id":1,"score":1.5,"name":"a","ok":true,"missing":null,
                "tags":["x"],"empty":[],"nested":{"k":2},"blank":{}}"#,
        )?;
        let types: Vec<_> = schema
            .fields()
            .iter()
            .map(|f| (f.name().as_str(), f.data_type().clone()))
            .collect();
        let list = |t| DataType::List(Arc::new(Field::new("item", t, true)));
        assert_eq!(
            types,
            vec![
                ("id", DataType::Int64),
                ("score", DataType::Float64),
                ("name", DataType::Utf8),
                ("ok", DataType::Boolean),
                ("missing", DataType::Utf8),
                ("tags", list(DataType::Utf8)),
                ("empty", list(DataType::Utf8)),
                (
                    "nested",
                    DataType::Struct(Fields::from(vec![Field::new("k", DataType::Int64, true)]))
                ),
                ("blank", DataType::Utf8),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_infer_schema_requires_object() {
        assert!(matches!(
            infer_schema("[1, 2]"),
            Err(ExecutionError::SchemaInferenceError(_))
        ));
        assert!(matches!(
            infer_schema("not json"),
            Err(ExecutionError::SchemaInferenceError(_))
        ));
    }

    #[test]
    fn test_flatten_rows() -> ExecutionResult<()> {
        let rows = [
            r#"{"id":1,"name":"a","score":2.5}"#,
            r#"{"id":2,"name":"b","score":3,"extra":true}"#,
            r#"{"id":3}"#,
        ];
        let schema = infer_schema(rows[0])?;
        let batch = flatten(&rows, schema)?;
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 3);
        let ids = batch.column(0).as_primitive::<Int64Type>();
        assert_eq!(ids.values().to_vec(), vec![1, 2, 3]);
        let names = batch.column(1).as_string::<i32>();
        assert_eq!(names.value(1), "b");
        assert!(names.is_null(2));
        let scores = batch.column(2).as_primitive::<Float64Type>();
        assert_eq!(scores.value(1), 3.0);
        assert!(scores.is_null(2));
        Ok(())
    }

    #[test]
    fn test_mismatched_values() -> ExecutionResult<()> {
        let rows = [
            r#"{"id":1,"label":"x","flag":false}"#,
            r#"{"id":"two","label":{"a":1},"flag":"yes"}"#,
            r#"{"id":1.5,"label":7,"flag":null}"#,
        ];
        let schema = infer_schema(rows[0])?;
        let batch = flatten(&rows, schema)?;
        let ids = batch.column(0).as_primitive::<Int64Type>();
        assert!(ids.is_null(1));
        assert!(ids.is_null(2));
        let labels = batch.column(1).as_string::<i32>();
        assert_eq!(labels.value(1), r#"{"a":1}"#);
        assert_eq!(labels.value(2), "7");
        let flags = batch.column(2).as_boolean();
        assert!(!flags.value(0));
        assert!(flags.is_null(1));
        Ok(())
    }

    #[test]
    fn test_unparsable_row_becomes_nulls() -> ExecutionResult<()> {
        let rows = [r#"{"a":1,"b":"x"}"#, "{not json", "42"];
        let schema = infer_schema(rows[0])?;
        let batch = flatten(&rows, schema)?;
        assert_eq!(batch.num_rows(), 3);
        for column in batch.columns() {
            assert!(column.is_null(1));
            assert!(column.is_null(2));
        }
        Ok(())
    }

    #[test]
    fn test_nested_values_stay_nested() -> ExecutionResult<()> {
        let rows = [
            r#"{"point":{"x":1,"y":2},"tags":["a","b"]}"#,
            r#"{"point":{"x":3},"tags":[1,null]}"#,
        ];
        let schema = infer_schema(rows[0])?;
        let batch = flatten(&rows, schema)?;
        assert_eq!(batch.num_columns(), 2);
        let point = batch.column(0).as_struct();
        let y = point.column(1).as_primitive::<Int64Type>();
        assert_eq!(y.value(0), 2);
        assert!(y.is_null(1));
        let tags = batch.column(1).as_list::<i32>();
        let second = tags.value(1);
        let second = second.as_string::<i32>();
        assert_eq!(second.value(0), "1");
        assert!(second.is_null(1));
        Ok(())
    }

    #[test]
    fn test_error_record_sample_drops_row_fields() -> ExecutionResult<()> {
        let rows = [
            r#"{"error":"query error: boom","query":"SELECT bad"}"#,
            r#"{"id":1,"name":"a"}"#,
        ];
        let schema = infer_schema(rows[0])?;
        let batch = flatten(&rows, schema)?;
        let names: Vec<_> = batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["error", "query"]);
        assert_eq!(batch.column(0).as_string::<i32>().value(0), "query error: boom");
        assert!(batch.column(0).is_null(1));
        assert!(batch.column(1).is_null(1));
        Ok(())
    }

    #[test]
    fn test_flatten_no_rows() -> ExecutionResult<()> {
        let schema = infer_schema(r#"{"a":1}"#)?;
        let batch = flatten::<&str>(&[], schema)?;
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
        Ok(())
    }
}
