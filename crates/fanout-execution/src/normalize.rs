use chrono::{SecondsFormat, Timelike};
use datafusion::arrow::array::timezone::Tz;
use datafusion::arrow::array::{Array, ArrowPrimitiveType, AsArray, RecordBatch};
use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{
    ArrowTemporalType, ArrowTimestampType, DataType, Date32Type, Date64Type, Float16Type,
    Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, Time32MillisecondType,
    Time32SecondType, Time64MicrosecondType, Time64NanosecondType, TimeUnit,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use datafusion::arrow::util::display::{ArrayFormatter, FormatOptions};
use serde_json::{Map, Number, Value};

/// A single result row keyed by column name, in column order.
pub type RowRecord = Map<String, Value>;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const TIME_MICROS_FORMAT: &str = "%H:%M:%S%.6f";
const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const NAIVE_DATETIME_MICROS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Fractional seconds are printed with exactly six digits, and only when the
/// value has a non-zero microsecond part. Nanoseconds are truncated.
fn has_micros<T: Timelike>(value: &T) -> bool {
    value.nanosecond() % 1_000_000_000 >= 1_000
}

/// Converts one cell of an Arrow column into a JSON value.
///
/// Date and time values become ISO-8601 strings, values with a natural JSON
/// representation are kept as they are, and anything else is rendered as text.
/// This never fails.
pub fn normalize_value(array: &dyn Array, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Null => Value::Null,
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Value::from(array.as_primitive::<Int8Type>().value(row)),
        DataType::Int16 => Value::from(array.as_primitive::<Int16Type>().value(row)),
        DataType::Int32 => Value::from(array.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => Value::from(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::from(array.as_primitive::<UInt8Type>().value(row)),
        DataType::UInt16 => Value::from(array.as_primitive::<UInt16Type>().value(row)),
        DataType::UInt32 => Value::from(array.as_primitive::<UInt32Type>().value(row)),
        DataType::UInt64 => Value::from(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float16 => {
            let value = array.as_primitive::<Float16Type>().value(row).to_f64();
            float_or_text(value, array, row)
        }
        DataType::Float32 => {
            // Go through the shortest decimal representation so that `0.1f32`
            // is not widened to `0.10000000149011612`.
            let value = array.as_primitive::<Float32Type>().value(row);
            match value.to_string().parse::<f64>() {
                Ok(value) => float_or_text(value, array, row),
                Err(_) => to_text(array, row),
            }
        }
        DataType::Float64 => {
            let value = array.as_primitive::<Float64Type>().value(row);
            float_or_text(value, array, row)
        }
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(row).to_string()),
        DataType::Utf8View => Value::String(array.as_string_view().value(row).to_string()),
        DataType::Date32 => iso_or_text(format_date::<Date32Type>(array, row), array, row),
        DataType::Date64 => iso_or_text(format_date::<Date64Type>(array, row), array, row),
        DataType::Time32(TimeUnit::Second) => {
            iso_or_text(format_time::<Time32SecondType>(array, row), array, row)
        }
        DataType::Time32(TimeUnit::Millisecond) => {
            iso_or_text(format_time::<Time32MillisecondType>(array, row), array, row)
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            iso_or_text(format_time::<Time64MicrosecondType>(array, row), array, row)
        }
        DataType::Time64(TimeUnit::Nanosecond) => {
            iso_or_text(format_time::<Time64NanosecondType>(array, row), array, row)
        }
        DataType::Timestamp(unit, tz) => {
            let tz = tz.as_deref();
            let value = match unit {
                TimeUnit::Second => format_timestamp::<TimestampSecondType>(array, row, tz),
                TimeUnit::Millisecond => {
                    format_timestamp::<TimestampMillisecondType>(array, row, tz)
                }
                TimeUnit::Microsecond => {
                    format_timestamp::<TimestampMicrosecondType>(array, row, tz)
                }
                TimeUnit::Nanosecond => {
                    format_timestamp::<TimestampNanosecondType>(array, row, tz)
                }
            };
            iso_or_text(value, array, row)
        }
        DataType::List(_) => normalize_elements(array.as_list::<i32>().value(row).as_ref()),
        DataType::LargeList(_) => normalize_elements(array.as_list::<i64>().value(row).as_ref()),
        DataType::FixedSizeList(_, _) => {
            normalize_elements(array.as_fixed_size_list().value(row).as_ref())
        }
        DataType::Struct(_) => {
            let array = array.as_struct();
            let record = array
                .fields()
                .iter()
                .zip(array.columns())
                .map(|(field, column)| {
                    (field.name().clone(), normalize_value(column.as_ref(), row))
                })
                .collect();
            Value::Object(record)
        }
        DataType::Dictionary(_, value_type) => {
            match cast(array.slice(row, 1).as_ref(), value_type.as_ref()) {
                Ok(value) => normalize_value(value.as_ref(), 0),
                Err(_) => to_text(array, row),
            }
        }
        _ => to_text(array, row),
    }
}

/// Builds the record for one row of a result batch.
pub fn normalize_row(batch: &RecordBatch, row: usize) -> RowRecord {
    batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, column)| (field.name().clone(), normalize_value(column.as_ref(), row)))
        .collect()
}

/// Builds the record for one row of a result batch and serializes it as a JSON object.
pub fn row_to_json(batch: &RecordBatch, row: usize) -> String {
    Value::Object(normalize_row(batch, row)).to_string()
}

fn normalize_elements(values: &dyn Array) -> Value {
    Value::Array((0..values.len()).map(|i| normalize_value(values, i)).collect())
}

fn float_or_text(value: f64, array: &dyn Array, row: usize) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| to_text(array, row))
}

fn to_text(array: &dyn Array, row: usize) -> Value {
    let options = FormatOptions::default();
    let text = match ArrayFormatter::try_new(array, &options) {
        Ok(formatter) => formatter.value(row).to_string(),
        Err(_) => format!("<{}>", array.data_type()),
    };
    Value::String(text)
}

fn iso_or_text(value: Option<String>, array: &dyn Array, row: usize) -> Value {
    value
        .map(Value::String)
        .unwrap_or_else(|| to_text(array, row))
}

fn format_date<T>(array: &dyn Array, row: usize) -> Option<String>
where
    T: ArrowTemporalType,
    i64: From<<T as ArrowPrimitiveType>::Native>,
{
    array
        .as_primitive::<T>()
        .value_as_date(row)
        .map(|date| date.format(DATE_FORMAT).to_string())
}

fn format_time<T>(array: &dyn Array, row: usize) -> Option<String>
where
    T: ArrowTemporalType,
    i64: From<<T as ArrowPrimitiveType>::Native>,
{
    array
        .as_primitive::<T>()
        .value_as_time(row)
        .map(|time| {
            let format = if has_micros(&time) {
                TIME_MICROS_FORMAT
            } else {
                TIME_FORMAT
            };
            time.format(format).to_string()
        })
}

fn format_timestamp<T>(array: &dyn Array, row: usize, tz: Option<&str>) -> Option<String>
where
    T: ArrowTimestampType,
{
    let array = array.as_primitive::<T>();
    match tz {
        None => array.value_as_datetime(row).map(|dt| {
            let format = if has_micros(&dt) {
                NAIVE_DATETIME_MICROS_FORMAT
            } else {
                NAIVE_DATETIME_FORMAT
            };
            dt.format(format).to_string()
        }),
        Some(tz) => {
            let tz: Tz = tz.parse().ok()?;
            array.value_as_datetime_with_tz(row, tz).map(|dt| {
                let seconds = if has_micros(&dt) {
                    SecondsFormat::Micros
                } else {
                    SecondsFormat::Secs
                };
                dt.fixed_offset().to_rfc3339_opts(seconds, false)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use datafusion::arrow::array::{
        ArrayRef, BinaryArray, BooleanArray, Date32Array, Decimal128Array, DictionaryArray,
        Float32Array, Float64Array, Int32Array, ListArray, StringArray, StructArray,
        Time32MillisecondArray, Time64MicrosecondArray, Time64NanosecondArray,
        TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
        TimestampSecondArray,
    };
    use datafusion::arrow::datatypes::{Field, Schema};
    use serde_json::json;

    use super::*;

    const MICROS: i64 = 1_710_505_800_123_456;

    #[test]
    fn test_json_native_values_are_kept() {
        assert_eq!(normalize_value(&Int32Array::from(vec![42]), 0), json!(42));
        assert_eq!(normalize_value(&Float64Array::from(vec![1.5]), 0), json!(1.5));
        assert_eq!(normalize_value(&Float32Array::from(vec![0.1f32]), 0), json!(0.1));
        assert_eq!(normalize_value(&BooleanArray::from(vec![true]), 0), json!(true));
        assert_eq!(normalize_value(&StringArray::from(vec!["abc"]), 0), json!("abc"));
        assert_eq!(
            normalize_value(&StringArray::from(vec![None::<&str>]), 0),
            Value::Null
        );
    }

    #[test]
    fn test_date_and_time_values_become_iso_strings() {
        assert_eq!(
            normalize_value(&Date32Array::from(vec![19797]), 0),
            json!("2024-03-15")
        );
        assert_eq!(
            normalize_value(&TimestampMicrosecondArray::from(vec![MICROS]), 0),
            json!("2024-03-15T12:30:00.123456")
        );
        assert_eq!(
            normalize_value(&TimestampSecondArray::from(vec![1_710_505_800]), 0),
            json!("2024-03-15T12:30:00")
        );
        assert_eq!(
            normalize_value(
                &TimestampMicrosecondArray::from(vec![MICROS]).with_timezone("+02:00"),
                0
            ),
            json!("2024-03-15T14:30:00.123456+02:00")
        );
        assert_eq!(
            normalize_value(&Time64MicrosecondArray::from(vec![45_000_123_456]), 0),
            json!("12:30:00.123456")
        );
    }

    #[test]
    fn test_fractional_seconds_have_six_digits() {
        assert_eq!(
            normalize_value(&TimestampMillisecondArray::from(vec![1_710_505_800_123]), 0),
            json!("2024-03-15T12:30:00.123000")
        );
        assert_eq!(
            normalize_value(&TimestampMicrosecondArray::from(vec![1_710_505_800_123_000]), 0),
            json!("2024-03-15T12:30:00.123000")
        );
        assert_eq!(
            normalize_value(
                &TimestampMicrosecondArray::from(vec![1_710_505_800_500_000]).with_timezone("UTC"),
                0
            ),
            json!("2024-03-15T12:30:00.500000+00:00")
        );
        assert_eq!(
            normalize_value(
                &TimestampMicrosecondArray::from(vec![1_710_505_800_000_000])
                    .with_timezone("+00:00"),
                0
            ),
            json!("2024-03-15T12:30:00+00:00")
        );
        assert_eq!(
            normalize_value(&Time32MillisecondArray::from(vec![45_000_500]), 0),
            json!("12:30:00.500000")
        );
    }

    #[test]
    fn test_nanoseconds_are_truncated_to_micros() {
        assert_eq!(
            normalize_value(
                &TimestampNanosecondArray::from(vec![1_710_505_800_123_456_789]),
                0
            ),
            json!("2024-03-15T12:30:00.123456")
        );
        assert_eq!(
            normalize_value(&TimestampNanosecondArray::from(vec![1_710_505_800_000_000_999]), 0),
            json!("2024-03-15T12:30:00")
        );
        assert_eq!(
            normalize_value(&Time64NanosecondArray::from(vec![45_000_000_000_001]), 0),
            json!("12:30:00")
        );
    }

    #[test]
    fn test_normalizing_iso_string_again_is_noop() {
        let first = normalize_value(&TimestampMicrosecondArray::from(vec![MICROS]), 0);
        let Value::String(text) = &first else {
            panic!("expected a string, got {first}");
        };
        let reparsed: Value = serde_json::from_str(&first.to_string()).expect("valid JSON");
        assert_eq!(reparsed, first);
        let second = normalize_value(&StringArray::from(vec![text.as_str()]), 0);
        assert_eq!(second, first);
    }

    #[test]
    fn test_other_values_fall_back_to_text() {
        let decimal = Decimal128Array::from(vec![1234])
            .with_precision_and_scale(10, 2)
            .expect("valid decimal");
        assert_eq!(normalize_value(&decimal, 0), json!("12.34"));
        assert!(normalize_value(&BinaryArray::from(vec![b"ab".as_ref()]), 0).is_string());
        assert_eq!(
            normalize_value(&Float64Array::from(vec![f64::NAN]), 0),
            json!("NaN")
        );
    }

    #[test]
    fn test_nested_values_are_normalized_recursively() {
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![
            Some(1),
            None,
            Some(3),
        ])]);
        assert_eq!(normalize_value(&list, 0), json!([1, null, 3]));

        let strukt = StructArray::from(vec![
            (
                Arc::new(Field::new("day", DataType::Date32, true)),
                Arc::new(Date32Array::from(vec![19797])) as ArrayRef,
            ),
            (
                Arc::new(Field::new("n", DataType::Int32, true)),
                Arc::new(Int32Array::from(vec![7])) as ArrayRef,
            ),
        ]);
        assert_eq!(
            normalize_value(&strukt, 0),
            json!({"day": "2024-03-15", "n": 7})
        );

        let dictionary: DictionaryArray<Int32Type> = vec!["a", "b", "a"].into_iter().collect();
        assert_eq!(normalize_value(&dictionary, 2), json!("a"));
    }

    #[test]
    fn test_row_to_json_keeps_column_order() -> datafusion::common::Result<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("z", DataType::Int32, false),
            Field::new("a", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("x"), None])),
            ],
        )?;
        assert_eq!(row_to_json(&batch, 0), r#"{"z":1,"a":"x"}"#);
        assert_eq!(row_to_json(&batch, 1), r#"{"z":2,"a":null}"#);
        Ok(())
    }
}
