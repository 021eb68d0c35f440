use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::Record;

type Compare = dyn Fn(&Record, &Record) -> Ordering + Send + Sync;

/// Ordering applied to a view's projected items
///
/// Sorting is stable: records comparing equal keep their key order.
#[derive(Clone)]
pub struct SortKey {
    compare: Arc<Compare>,
}

impl SortKey {
    pub fn new(compare: impl Fn(&Record, &Record) -> Ordering + Send + Sync + 'static) -> Self {
        Self {
            compare: Arc::new(compare),
        }
    }

    /// Ascending by `field`; records missing it come first
    pub fn ascending(field: &str) -> Self {
        let field = field.to_string();
        Self::new(move |a, b| compare_values(a.get(&field), b.get(&field)))
    }

    /// Descending by `field`; records missing it come last
    pub fn descending(field: &str) -> Self {
        let field = field.to_string();
        Self::new(move |a, b| compare_values(b.get(&field), a.get(&field)))
    }

    pub fn compare(
        &self,
        a: &Record,
        b: &Record,
    ) -> Ordering {
        (self.compare)(a, b)
    }

    pub fn sort(
        &self,
        items: &mut [Record],
    ) {
        items.sort_by(|a, b| self.compare(a, b));
    }
}

impl fmt::Debug for SortKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("SortKey")
    }
}

/// Missing < null < bool < number < string < array/object
fn compare_values(
    a: Option<&Value>,
    b: Option<&Value>,
) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) if rank(Some(x)) == rank(Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) | Some(Value::Object(_)) => 5,
    }
}
