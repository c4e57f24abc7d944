use std::cmp::Ordering;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

/// Conjunction of column filters with optional ordering and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<(String, bool)>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> Option<(&str, bool)> {
        self.order.as_ref().map(|(c, asc)| (c.as_str(), *asc))
    }

    pub fn max_rows(&self) -> Option<usize> {
        self.limit
    }

    /// Whether a row satisfies every filter.
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| match f {
            Filter::Eq(col, expected) => row.get(col) == Some(expected),
            Filter::In(col, options) => row.get(col).is_some_and(|v| options.contains(v)),
        })
    }

    /// Render as PostgREST query parameters.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| match f {
                Filter::Eq(col, Value::Null) => (col.clone(), "is.null".to_string()),
                Filter::Eq(col, v) => (col.clone(), format!("eq.{}", render(v))),
                Filter::In(col, vs) => {
                    let items: Vec<String> = vs.iter().map(quote).collect();
                    (col.clone(), format!("in.({})", items.join(",")))
                }
            })
            .collect();
        if let Some((col, asc)) = &self.order {
            let dir = if *asc { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{col}.{dir}")));
        }
        if let Some(n) = self.limit {
            params.push(("limit".to_string(), n.to_string()));
        }
        params
    }

    /// Sort and truncate rows in memory the way the server would.
    pub fn apply_order(&self, rows: &mut Vec<Value>) {
        if let Some((col, asc)) = &self.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(col), b.get(col));
                if *asc { ord } else { ord.reverse() }
            });
        }
        if let Some(n) = self.limit {
            rows.truncate(n);
        }
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => other.to_string(),
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Greater,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_postgrest_params() {
        let q = Query::new()
            .eq("product_id", "p-1")
            .is_in("id", ["a", "b,c"])
            .order_by("position", true)
            .limit(10);
        assert_eq!(
            q.to_params(),
            vec![
                ("product_id".to_string(), "eq.p-1".to_string()),
                ("id".to_string(), "in.(\"a\",\"b,c\")".to_string()),
                ("order".to_string(), "position.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn matches_and_orders_in_memory() {
        let q = Query::new().eq("product_id", "p").order_by("position", false);
        let mut rows = vec![
            json!({"product_id": "p", "position": 1}),
            json!({"product_id": "q", "position": 5}),
            json!({"product_id": "p", "position": 3}),
        ];
        rows.retain(|r| q.matches(r));
        q.apply_order(&mut rows);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["position"], 3);
    }
}
