use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// One column value flowing through the engine. `Null` is a legitimate
/// absent contribution, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:.2}", v),
            Value::Text(v) => f.write_str(v),
        }
    }
}

/// Structural bucket key. Floats are keyed by their bit pattern so keys
/// are hashable; ordering uses the total order over the decoded value.
/// `Overflow` is the distinguished above-upper-bound bucket of linear
/// distributions and sorts after everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Null,
    Int(i64),
    Float(u64),
    Text(String),
    Composite(Vec<Key>),
    Overflow,
}

impl Key {
    fn from_value(value: &Value) -> Key {
        match value {
            Value::Null => Key::Null,
            Value::Int(v) => Key::Int(*v),
            Value::Float(v) => Key::Float(v.to_bits()),
            Value::Text(v) => Key::Text(v.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Null => Value::Null,
            Key::Int(v) => Value::Int(*v),
            Key::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Key::Text(v) => Value::Text(v.clone()),
            Key::Composite(_) => Value::Null,
            Key::Overflow => Value::Text("overflow".to_string()),
        }
    }

    /// Ordering across keys of the same shape; `None` when the shapes
    /// are not mutually comparable.
    pub fn try_cmp(&self, other: &Key) -> Option<Ordering> {
        match (self, other) {
            (Key::Null, Key::Null) => Some(Ordering::Equal),
            (Key::Null, _) => Some(Ordering::Less),
            (_, Key::Null) => Some(Ordering::Greater),
            (Key::Overflow, Key::Overflow) => Some(Ordering::Equal),
            (Key::Overflow, _) => Some(Ordering::Greater),
            (_, Key::Overflow) => Some(Ordering::Less),
            (Key::Int(a), Key::Int(b)) => Some(a.cmp(b)),
            (Key::Float(a), Key::Float(b)) => {
                Some(f64::from_bits(*a).total_cmp(&f64::from_bits(*b)))
            }
            (Key::Text(a), Key::Text(b)) => Some(a.cmp(b)),
            (Key::Composite(a), Key::Composite(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.try_cmp(y)? {
                        Ordering::Equal => continue,
                        unequal => return Some(unequal),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    fn shape(&self) -> Option<Vec<u8>> {
        match self {
            // Null and Overflow order against any shape.
            Key::Null | Key::Overflow => None,
            Key::Int(_) => Some(vec![1]),
            Key::Float(_) => Some(vec![2]),
            Key::Text(_) => Some(vec![3]),
            Key::Composite(parts) => {
                let mut sig = vec![4, parts.len() as u8];
                for part in parts {
                    sig.extend(part.shape().unwrap_or_else(|| vec![0]));
                }
                Some(sig)
            }
        }
    }
}

#[derive(Debug)]
pub enum QuantizeError {
    /// The input tuple does not match the declared column count. A
    /// caller programming error, never silently truncated or padded.
    ColumnMismatch { expected: usize, got: usize },
    /// A linear distribution key column held a non-numeric value.
    NonNumericKey { got: String },
}

impl fmt::Display for QuantizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantizeError::ColumnMismatch { expected, got } => {
                write!(f, "expected {} column values, got {}", expected, got)
            }
            QuantizeError::NonNumericKey { got } => {
                write!(f, "linear distribution key must be numeric, got {}", got)
            }
        }
    }
}

impl std::error::Error for QuantizeError {}

#[derive(Debug, Clone)]
enum KeyCalculator {
    Identity,
    Composite(usize),
    LinearF64 { lower: f64, upper: f64, step: f64 },
    LinearI64 { lower: i64, upper: i64, step: i64 },
}

impl KeyCalculator {
    fn key(&self, values: &[Value]) -> Result<Key, QuantizeError> {
        match self {
            KeyCalculator::Identity => Ok(Key::from_value(&values[0])),
            KeyCalculator::Composite(n) => {
                Ok(Key::Composite(values[..*n].iter().map(Key::from_value).collect()))
            }
            KeyCalculator::LinearF64 { lower, upper, step } => {
                let v = values[0].as_f64().ok_or_else(|| QuantizeError::NonNumericKey {
                    got: format!("{:?}", values[0]),
                })?;
                if v <= *lower {
                    return Ok(Key::Float(lower.to_bits()));
                }
                if v > *upper {
                    return Ok(Key::Overflow);
                }
                // Smallest boundary on the upper, upper-step, ... ladder
                // that is still >= v; each bucket owns its upper bound.
                let steps = ((*upper - v) / *step).floor();
                let mut boundary = *upper - steps * *step;
                if boundary < v {
                    boundary += *step;
                }
                Ok(Key::Float(boundary.min(*upper).to_bits()))
            }
            KeyCalculator::LinearI64 { lower, upper, step } => {
                let v = values[0].as_i64().ok_or_else(|| QuantizeError::NonNumericKey {
                    got: format!("{:?}", values[0]),
                })?;
                if v <= *lower {
                    return Ok(Key::Int(*lower));
                }
                if v > *upper {
                    return Ok(Key::Overflow);
                }
                Ok(Key::Int(lower + step * ((v - lower - 1).div_euclid(*step) + 1)))
            }
        }
    }
}

/// Accumulator functions, instantiated once per bucket per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Count,
    Sum,
    SumInt,
    Min,
    MinInt,
    Max,
    MaxInt,
    Average,
    AverageInt,
}

impl Function {
    fn build(self) -> Box<dyn Accumulator> {
        match self {
            Function::Count => Box::new(Count::default()),
            Function::Sum => Box::new(Sum::default()),
            Function::SumInt => Box::new(SumInt::default()),
            Function::Min => Box::new(Extreme::minimum()),
            Function::MinInt => Box::new(ExtremeInt::minimum()),
            Function::Max => Box::new(Extreme::maximum()),
            Function::MaxInt => Box::new(ExtremeInt::maximum()),
            Function::Average => Box::new(Average::default()),
            Function::AverageInt => Box::new(AverageInt::default()),
        }
    }
}

trait Accumulator {
    fn add(&mut self, value: &Value);
    fn value(&self) -> Value;
}

#[derive(Default)]
struct Count {
    count: i64,
}

impl Accumulator for Count {
    // Counts every contribution, absent ones included.
    fn add(&mut self, _value: &Value) {
        self.count += 1;
    }

    fn value(&self) -> Value {
        Value::Int(self.count)
    }
}

#[derive(Default)]
struct Sum {
    sum: f64,
}

impl Accumulator for Sum {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum += v;
        }
    }

    fn value(&self) -> Value {
        Value::Float(self.sum)
    }
}

#[derive(Default)]
struct SumInt {
    sum: i64,
}

impl Accumulator for SumInt {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_i64() {
            self.sum += v;
        }
    }

    fn value(&self) -> Value {
        Value::Int(self.sum)
    }
}

struct Extreme {
    current: Option<f64>,
    prefer_less: bool,
}

impl Extreme {
    fn minimum() -> Self {
        Self { current: None, prefer_less: true }
    }

    fn maximum() -> Self {
        Self { current: None, prefer_less: false }
    }
}

impl Accumulator for Extreme {
    fn add(&mut self, value: &Value) {
        let v = match value.as_f64() {
            Some(v) => v,
            None => return,
        };
        self.current = Some(match self.current {
            None => v,
            Some(held) => {
                if self.prefer_less {
                    held.min(v)
                } else {
                    held.max(v)
                }
            }
        });
    }

    fn value(&self) -> Value {
        Value::Float(self.current.unwrap_or(0.0))
    }
}

struct ExtremeInt {
    current: Option<i64>,
    prefer_less: bool,
}

impl ExtremeInt {
    fn minimum() -> Self {
        Self { current: None, prefer_less: true }
    }

    fn maximum() -> Self {
        Self { current: None, prefer_less: false }
    }
}

impl Accumulator for ExtremeInt {
    fn add(&mut self, value: &Value) {
        let v = match value.as_i64() {
            Some(v) => v,
            None => return,
        };
        self.current = Some(match self.current {
            None => v,
            Some(held) => {
                if self.prefer_less {
                    held.min(v)
                } else {
                    held.max(v)
                }
            }
        });
    }

    fn value(&self) -> Value {
        Value::Int(self.current.unwrap_or(0))
    }
}

#[derive(Default)]
struct Average {
    sum: f64,
    count: u64,
}

impl Accumulator for Average {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_f64() {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Value {
        if self.count > 0 {
            Value::Float(self.sum / self.count as f64)
        } else {
            Value::Float(0.0)
        }
    }
}

#[derive(Default)]
struct AverageInt {
    sum: i64,
    count: i64,
}

impl Accumulator for AverageInt {
    fn add(&mut self, value: &Value) {
        if let Some(v) = value.as_i64() {
            self.sum += v;
            self.count += 1;
        }
    }

    fn value(&self) -> Value {
        if self.count > 0 {
            Value::Int(self.sum / self.count)
        } else {
            Value::Int(0)
        }
    }
}

struct Bucket {
    key: Key,
    object_ids: Vec<u32>,
    accumulators: Vec<Box<dyn Accumulator>>,
}

/// Builder for a [`Quantize`] engine: key columns first, then one
/// accumulator column per [`Function`].
pub struct QuantizeBuilder {
    key_labels: Vec<String>,
    calculator: KeyCalculator,
    functions: Vec<(String, Function)>,
}

impl QuantizeBuilder {
    pub fn column(mut self, label: &str, function: Function) -> Self {
        self.functions.push((label.to_string(), function));
        self
    }

    pub fn build(self) -> Quantize {
        Quantize {
            key_labels: self.key_labels,
            calculator: self.calculator,
            functions: self.functions,
            by_key: HashMap::new(),
            buckets: Vec::new(),
        }
    }
}

/// Streams `(object ids, column values)` tuples into buckets and emits a
/// small table. Buckets keep every contributing object id so consumers
/// can still resolve a row back to the heap.
pub struct Quantize {
    key_labels: Vec<String>,
    calculator: KeyCalculator,
    functions: Vec<(String, Function)>,
    by_key: HashMap<Key, usize>,
    buckets: Vec<Bucket>,
}

impl Quantize {
    /// Groups rows by identical leading values, one key column per
    /// label.
    pub fn value_distribution(labels: &[&str]) -> QuantizeBuilder {
        let calculator = if labels.len() > 1 {
            KeyCalculator::Composite(labels.len())
        } else {
            KeyCalculator::Identity
        };
        QuantizeBuilder {
            key_labels: labels.iter().map(|l| l.to_string()).collect(),
            calculator,
            functions: Vec::new(),
        }
    }

    /// Buckets the first column into `(lower, upper, step)` ranges;
    /// values at or below `lower` collapse into the lowest bucket,
    /// values above `upper` into the overflow bucket.
    pub fn linear_frequency_distribution(
        label: &str,
        lower: f64,
        upper: f64,
        step: f64,
    ) -> QuantizeBuilder {
        QuantizeBuilder {
            key_labels: vec![label.to_string()],
            calculator: KeyCalculator::LinearF64 { lower, upper, step },
            functions: Vec::new(),
        }
    }

    pub fn linear_frequency_distribution_int(
        label: &str,
        lower: i64,
        upper: i64,
        step: i64,
    ) -> QuantizeBuilder {
        QuantizeBuilder {
            key_labels: vec![label.to_string()],
            calculator: KeyCalculator::LinearI64 { lower, upper, step },
            functions: Vec::new(),
        }
    }

    pub fn key_len(&self) -> usize {
        self.key_labels.len()
    }

    pub fn add_value(
        &mut self,
        object_id: Option<u32>,
        values: &[Value],
    ) -> Result<(), QuantizeError> {
        let bucket = self.bucket_for(values)?;
        if let Some(id) = object_id {
            self.buckets[bucket].object_ids.push(id);
        }
        Ok(())
    }

    pub fn add_values(&mut self, object_ids: &[u32], values: &[Value]) -> Result<(), QuantizeError> {
        let bucket = self.bucket_for(values)?;
        self.buckets[bucket].object_ids.extend_from_slice(object_ids);
        Ok(())
    }

    fn bucket_for(&mut self, values: &[Value]) -> Result<usize, QuantizeError> {
        let expected = self.key_labels.len() + self.functions.len();
        if values.len() != expected {
            return Err(QuantizeError::ColumnMismatch { expected, got: values.len() });
        }
        let key = self.calculator.key(values)?;
        let index = match self.by_key.get(&key) {
            Some(index) => *index,
            None => {
                let accumulators =
                    self.functions.iter().map(|(_, f)| f.build()).collect();
                self.buckets.push(Bucket { key: key.clone(), object_ids: Vec::new(), accumulators });
                let index = self.buckets.len() - 1;
                self.by_key.insert(key, index);
                index
            }
        };
        let bucket = &mut self.buckets[index];
        for (i, accumulator) in bucket.accumulators.iter_mut().enumerate() {
            accumulator.add(&values[self.key_labels.len() + i]);
        }
        Ok(index)
    }

    /// Emits the bucket table, sorted by key ascending when every key is
    /// mutually comparable, in insertion order otherwise.
    pub fn result(self) -> QuantizedTable {
        let key_len = self.key_labels.len();
        let mut rows: Vec<BucketRow> = self
            .buckets
            .into_iter()
            .map(|bucket| {
                let key_values = match &bucket.key {
                    Key::Composite(parts) => parts.iter().map(Key::to_value).collect(),
                    key => vec![key.to_value()],
                };
                BucketRow {
                    key: bucket.key,
                    key_values,
                    values: bucket.accumulators.iter().map(|a| a.value()).collect(),
                    object_ids: bucket.object_ids,
                }
            })
            .collect();
        let sortable = {
            let mut shapes = rows.iter().filter_map(|r| r.key.shape());
            match shapes.next() {
                None => true,
                Some(first) => shapes.all(|s| s == first),
            }
        };
        if sortable {
            rows.sort_by(|a, b| a.key.try_cmp(&b.key).unwrap_or(Ordering::Equal));
        }
        QuantizedTable {
            key_labels: self.key_labels.clone(),
            value_labels: self.functions.iter().map(|(label, _)| label.clone()).collect(),
            key_len,
            rows,
        }
    }
}

#[derive(Serialize)]
pub struct BucketRow {
    #[serde(skip)]
    pub key: Key,
    pub key_values: Vec<Value>,
    pub values: Vec<Value>,
    pub object_ids: Vec<u32>,
}

#[derive(Serialize)]
pub struct QuantizedTable {
    pub key_labels: Vec<String>,
    pub value_labels: Vec<String>,
    pub key_len: usize,
    pub rows: Vec<BucketRow>,
}

impl QuantizedTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
