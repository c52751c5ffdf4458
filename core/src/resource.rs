//! Resource accessors returned by `StofwareClient::model` and
//! `StofwareClient::view`.
//!
//! Each accessor owns its query parameters and borrows the client
//! read-only, so accessors created from the same client never share mutable
//! state. Every executing operation has a `build_*` twin that returns the
//! request it would send.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::client::StofwareClient;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::query::QueryParams;
use crate::types::{AggregateColumn, BooleanOperator, Filter, FilterGroup, FilterValue, OrderBy, OrderDirection, QueryOperator};

/// Chaining setters shared by every accessor.
macro_rules! query_builder_methods {
    () => {
        /// Add a filter to the flat `filters` list.
        pub fn filter(mut self, name: &str, operator: QueryOperator, value: impl Into<FilterValue>) -> Self {
            self.params.filters.push(Filter::new(name, operator, value));
            self
        }

        /// Add a filter to the boolean `filter` group.
        /// See [`QueryParams::append_filter`] for how operators merge.
        pub fn append_filter(
            mut self,
            name: &str,
            operator: QueryOperator,
            value: impl Into<FilterValue>,
            boolean_operator: BooleanOperator,
        ) -> Self {
            self.params
                .append_filter(Filter::new(name, operator, value), boolean_operator);
            self
        }

        /// Replace the boolean `filter` group.
        pub fn set_filter(mut self, group: FilterGroup) -> Self {
            self.params.filter = Some(group);
            self
        }

        /// Replace the boolean `filter` group with one parsed from JSON text.
        pub fn set_filter_json(mut self, raw: &str) -> Result<Self, ApiError> {
            self.params.filter = Some(QueryParams::parse_filter_group(raw)?);
            Ok(self)
        }

        pub fn order_by(mut self, name: &str, direction: OrderDirection) -> Self {
            self.params.order_by = Some(OrderBy {
                name: name.to_string(),
                direction,
            });
            self
        }

        pub fn page(mut self, num: u32) -> Self {
            self.params.page = Some(num);
            self
        }

        pub fn page_limit(mut self, limit: u32) -> Self {
            self.params.page_limit = Some(limit);
            self
        }

        /// Set an arbitrary query parameter.
        pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
            self.params.extra.insert(key.to_string(), value.into());
            self
        }

        /// Merge the members of a JSON object into the query parameters.
        pub fn params_json(mut self, raw: &str) -> Result<Self, ApiError> {
            self.params.extend_json(raw)?;
            Ok(self)
        }

        pub fn params(&self) -> &QueryParams {
            &self.params
        }
    };
}

/// Accessor for one model collection (`/models/{name}`).
#[derive(Debug, Clone)]
pub struct ModelQuery<'a> {
    client: &'a StofwareClient,
    model: String,
    params: QueryParams,
}

impl<'a> ModelQuery<'a> {
    pub(crate) fn new(client: &'a StofwareClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            params: QueryParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.model
    }

    query_builder_methods!();

    pub fn select<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.params.select = Some(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    pub fn include<S: AsRef<str>>(mut self, relations: &[S]) -> Self {
        self.params.include = Some(relations.iter().map(|r| r.as_ref().to_string()).collect());
        self
    }

    // --- request builders ---

    pub fn build_get_all(&self) -> Result<HttpRequest, ApiError> {
        self.client
            .build_request::<Value>(HttpMethod::Get, &["models", self.model.as_str()], Some(&self.params), None)
    }

    pub fn build_get_single(&self, id: impl fmt::Display) -> Result<HttpRequest, ApiError> {
        let id = id.to_string();
        self.client.build_request::<Value>(
            HttpMethod::Get,
            &["models", self.model.as_str(), id.as_str()],
            Some(&self.params),
            None,
        )
    }

    /// `GET /aggregate/{model}` with the accessor's parameters plus `columns`
    /// and `extra_params`. The accessor itself is left unchanged.
    pub fn build_aggregate(
        &self,
        columns: &[AggregateColumn],
        extra_params: Option<Map<String, Value>>,
    ) -> Result<HttpRequest, ApiError> {
        let params = aggregate_params(&self.params, columns, extra_params);
        self.client
            .build_request::<Value>(HttpMethod::Get, &["aggregate", self.model.as_str()], Some(&params), None)
    }

    pub fn build_post<T: Serialize + ?Sized>(&self, data: &T) -> Result<HttpRequest, ApiError> {
        self.client
            .build_request(HttpMethod::Post, &["models", self.model.as_str()], None, Some(data))
    }

    pub fn build_put<T: Serialize + ?Sized>(&self, id: impl fmt::Display, data: &T) -> Result<HttpRequest, ApiError> {
        let id = id.to_string();
        self.client
            .build_request(HttpMethod::Put, &["models", self.model.as_str(), id.as_str()], None, Some(data))
    }

    pub fn build_bulk_put<T: Serialize + ?Sized>(&self, data: &T) -> Result<HttpRequest, ApiError> {
        self.client
            .build_request(HttpMethod::Put, &["models", self.model.as_str()], None, Some(data))
    }

    pub fn build_delete(&self, id: impl fmt::Display) -> Result<HttpRequest, ApiError> {
        let id = id.to_string();
        self.client
            .build_request::<Value>(HttpMethod::Delete, &["models", self.model.as_str(), id.as_str()], None, None)
    }

    pub fn build_bulk_delete<T: Serialize + ?Sized>(&self, data: &T) -> Result<HttpRequest, ApiError> {
        self.client
            .build_request(HttpMethod::Delete, &["models", self.model.as_str()], None, Some(data))
    }

    // --- executing operations ---

    /// `GET /models/{model}` with the accumulated query parameters.
    pub fn get_all(&self) -> Result<Value, ApiError> {
        self.client.execute(self.build_get_all()?)
    }

    /// Like [`get_all`](Self::get_all), decoded into `T`.
    pub fn get_all_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        decode(self.get_all()?)
    }

    pub fn get_single(&self, id: impl fmt::Display) -> Result<Value, ApiError> {
        self.client.execute(self.build_get_single(id)?)
    }

    pub fn get_single_as<T: DeserializeOwned>(&self, id: impl fmt::Display) -> Result<T, ApiError> {
        decode(self.get_single(id)?)
    }

    pub fn aggregate(
        &self,
        columns: &[AggregateColumn],
        extra_params: Option<Map<String, Value>>,
    ) -> Result<Value, ApiError> {
        self.client.execute(self.build_aggregate(columns, extra_params)?)
    }

    pub fn post<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value, ApiError> {
        self.client.execute(self.build_post(data)?)
    }

    pub fn put<T: Serialize + ?Sized>(&self, id: impl fmt::Display, data: &T) -> Result<Value, ApiError> {
        self.client.execute(self.build_put(id, data)?)
    }

    pub fn bulk_put<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value, ApiError> {
        self.client.execute(self.build_bulk_put(data)?)
    }

    pub fn delete(&self, id: impl fmt::Display) -> Result<Value, ApiError> {
        self.client.execute(self.build_delete(id)?)
    }

    pub fn bulk_delete<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value, ApiError> {
        self.client.execute(self.build_bulk_delete(data)?)
    }
}

/// Accessor for one read-only view (`/views/{name}`).
#[derive(Debug, Clone)]
pub struct ViewQuery<'a> {
    client: &'a StofwareClient,
    view: String,
    params: QueryParams,
}

impl<'a> ViewQuery<'a> {
    pub(crate) fn new(client: &'a StofwareClient, view: &str) -> Self {
        Self {
            client,
            view: view.to_string(),
            params: QueryParams::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.view
    }

    query_builder_methods!();

    pub fn build_get_all(&self) -> Result<HttpRequest, ApiError> {
        self.client
            .build_request::<Value>(HttpMethod::Get, &["views", self.view.as_str()], Some(&self.params), None)
    }

    pub fn build_aggregate(
        &self,
        columns: &[AggregateColumn],
        extra_params: Option<Map<String, Value>>,
    ) -> Result<HttpRequest, ApiError> {
        let params = aggregate_params(&self.params, columns, extra_params);
        self.client.build_request::<Value>(
            HttpMethod::Get,
            &["views", self.view.as_str(), "aggregate"],
            Some(&params),
            None,
        )
    }

    pub fn get_all(&self) -> Result<Value, ApiError> {
        self.client.execute(self.build_get_all()?)
    }

    pub fn get_all_as<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        decode(self.get_all()?)
    }

    pub fn aggregate(
        &self,
        columns: &[AggregateColumn],
        extra_params: Option<Map<String, Value>>,
    ) -> Result<Value, ApiError> {
        self.client.execute(self.build_aggregate(columns, extra_params)?)
    }
}

fn aggregate_params(
    base: &QueryParams,
    columns: &[AggregateColumn],
    extra: Option<Map<String, Value>>,
) -> QueryParams {
    let mut params = base.clone();
    params.columns = Some(columns.to_vec());
    if let Some(extra) = extra {
        params.extra.extend(extra);
    }
    params
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde::Deserialize;
    use serde_json::json;

    use crate::config::ClientConfig;
    use crate::http::HttpResponse;
    use crate::transport::Transport;
    use crate::types::AggregateFunction;

    /// Records every request and answers with a canned response.
    #[derive(Debug)]
    struct Recorder {
        sent: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: String,
    }

    impl Recorder {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                status,
                body: body.to_string(),
            })
        }

        fn sent(&self) -> Vec<HttpRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl Transport for Recorder {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
            self.sent.lock().unwrap().push(request.clone());
            Ok(HttpResponse {
                status: self.status,
                headers: Vec::new(),
                body: self.body.clone(),
            })
        }
    }

    fn client_with(recorder: &Arc<Recorder>) -> StofwareClient {
        let config = ClientConfig::new("http://localhost:3000").token("secret");
        StofwareClient::with_transport(config, recorder.clone()).unwrap()
    }

    fn client() -> StofwareClient {
        StofwareClient::new("http://localhost:3000", "secret").unwrap()
    }

    fn query_of(req: &HttpRequest) -> Vec<(String, String)> {
        url::Url::parse(&req.url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn get_all_sends_exactly_one_authorized_get() {
        let recorder = Recorder::new(200, r#"[{"id": 1}]"#);
        let client = client_with(&recorder);

        let value = client.model("users").get_all().unwrap();

        assert_eq!(value, json!([{"id": 1}]));
        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, HttpMethod::Get);
        assert_eq!(sent[0].url, "http://localhost:3000/models/users");
        assert_eq!(sent[0].header("authorization"), Some("Bearer secret"));
    }

    #[test]
    fn get_all_not_found_surfaces_status_and_body() {
        let recorder = Recorder::new(404, "no such model");
        let client = client_with(&recorder);
        let err = client.model("ghosts").get_all().unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.body(), Some("no such model"));
    }

    #[test]
    fn get_all_malformed_json_is_decode_error() {
        let recorder = Recorder::new(200, "[{");
        let client = client_with(&recorder);
        let err = client.model("users").get_all().unwrap_err();
        assert!(matches!(err, ApiError::Deserialization(_)));
    }

    #[test]
    fn get_all_as_decodes_typed_records() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: i64,
            name: String,
        }
        let recorder = Recorder::new(200, r#"[{"id": 1, "name": "Ada"}]"#);
        let client = client_with(&recorder);
        let users: Vec<User> = client.model("users").get_all_as().unwrap();
        assert_eq!(
            users,
            vec![User {
                id: 1,
                name: "Ada".to_string()
            }]
        );
    }

    #[test]
    fn accessors_do_not_share_params() {
        let client = client();
        let first = client.model("x").page(2);
        let second = client.model("x");
        assert_eq!(first.params().page, Some(2));
        assert!(second.params().is_empty());
        assert_eq!(second.build_get_all().unwrap().url, "http://localhost:3000/models/x");
    }

    #[test]
    fn get_all_carries_query_params() {
        let req = client()
            .model("orders")
            .filter("status", QueryOperator::Eq, "open")
            .order_by("created_at", OrderDirection::Asc)
            .page(2)
            .page_limit(25)
            .select(&["id", "total"])
            .include(&["customer"])
            .build_get_all()
            .unwrap();

        let query = query_of(&req);
        let get = |k: &str| query.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone()).unwrap();
        let filters: Value = serde_json::from_str(&get("filters")).unwrap();
        assert_eq!(filters, json!([{"name": "status", "operator": "EQ", "value": "open"}]));
        let order: Value = serde_json::from_str(&get("order_by")).unwrap();
        assert_eq!(order, json!({"name": "created_at", "direction": "ASC"}));
        assert_eq!(get("page"), "2");
        assert_eq!(get("page_limit"), "25");
        assert_eq!(get("select"), r#"["id","total"]"#);
        assert_eq!(get("include"), r#"["customer"]"#);
    }

    #[test]
    fn set_filter_json_validates_input() {
        let client = client();
        assert!(client.model("x").set_filter_json("[]").is_err());
        let query = client
            .model("x")
            .set_filter_json(r#"{"operator":"OR","items":[]}"#)
            .unwrap();
        assert_eq!(query.params().filter.as_ref().unwrap().operator, BooleanOperator::Or);
    }

    #[test]
    fn get_single_uses_id_segment() {
        let req = client().model("users").select(&["name"]).build_get_single(42).unwrap();
        assert!(req.url.starts_with("http://localhost:3000/models/users/42?"));
    }

    #[test]
    fn aggregate_targets_aggregate_endpoint() {
        let mut extra = Map::new();
        extra.insert("group_by".to_string(), json!("region"));
        let client = client();
        let query = client.model("sales").page(2);
        let req = query
            .build_aggregate(&[AggregateColumn::new("amount", AggregateFunction::Sum)], Some(extra))
            .unwrap();
        assert!(req.url.starts_with("http://localhost:3000/aggregate/sales?"));
        let pairs = query_of(&req);
        assert!(pairs.contains(&("group_by".to_string(), "region".to_string())));
        let columns = pairs.iter().find(|(k, _)| k == "columns").map(|(_, v)| v).unwrap();
        let columns: Value = serde_json::from_str(columns).unwrap();
        assert_eq!(columns, json!([{"name": "amount", "function": "sum"}]));

        // Building does not leak the aggregate parameters into the accessor.
        assert_eq!(query.params().columns, None);
        assert!(query.params().extra.is_empty());
        assert_eq!(query.build_get_all().unwrap().url, "http://localhost:3000/models/sales?page=2");
    }

    #[test]
    fn param_overrides_typed_field_of_same_name() {
        let req = client().model("users").page(1).param("page", 5).build_get_all().unwrap();
        let pages: Vec<_> = query_of(&req).into_iter().filter(|(k, _)| k == "page").collect();
        assert_eq!(pages, [("page".to_string(), "5".to_string())]);

        let mut extra = Map::new();
        extra.insert("columns".to_string(), json!([{"name": "id", "function": "count"}]));
        let req = client()
            .model("sales")
            .build_aggregate(&[AggregateColumn::new("amount", AggregateFunction::Sum)], Some(extra))
            .unwrap();
        let columns: Vec<_> = query_of(&req).into_iter().filter(|(k, _)| k == "columns").collect();
        assert_eq!(columns.len(), 1);
        let sent: Value = serde_json::from_str(&columns[0].1).unwrap();
        assert_eq!(sent, json!([{"name": "id", "function": "count"}]));
    }

    #[test]
    fn debug_output_hides_token() {
        let client = StofwareClient::new("http://localhost:3000", "s3cr3t-token").unwrap();
        let model = format!("{:?}", client.model("users").page(2));
        assert!(!model.contains("s3cr3t-token"), "{model}");
        assert!(model.contains("<redacted>"));
        assert!(model.contains("users"));

        let view = format!("{:?}", client.view("active_users"));
        assert!(!view.contains("s3cr3t-token"), "{view}");
        assert!(view.contains("<redacted>"));
    }

    #[test]
    fn mutations_skip_query_params() {
        let client = client();
        let query = client.model("users").page(3);

        let post = query.build_post(&json!({"name": "Ada"})).unwrap();
        assert_eq!(post.method, HttpMethod::Post);
        assert_eq!(post.url, "http://localhost:3000/models/users");
        assert_eq!(post.body.as_deref(), Some(r#"{"name":"Ada"}"#));

        let put = query.build_put("u-1", &json!({"name": "Grace"})).unwrap();
        assert_eq!(put.method, HttpMethod::Put);
        assert_eq!(put.url, "http://localhost:3000/models/users/u-1");

        let bulk_put = query.build_bulk_put(&json!([{"id": 1}])).unwrap();
        assert_eq!(bulk_put.method, HttpMethod::Put);
        assert_eq!(bulk_put.url, "http://localhost:3000/models/users");

        let delete = query.build_delete(7).unwrap();
        assert_eq!(delete.method, HttpMethod::Delete);
        assert_eq!(delete.url, "http://localhost:3000/models/users/7");
        assert!(delete.body.is_none());

        let bulk_delete = query.build_bulk_delete(&json!({"ids": [1, 2]})).unwrap();
        assert_eq!(bulk_delete.method, HttpMethod::Delete);
        assert_eq!(bulk_delete.body.as_deref(), Some(r#"{"ids":[1,2]}"#));
    }

    #[test]
    fn view_endpoints() {
        let client = client();
        let req = client.view("active_users").build_get_all().unwrap();
        assert_eq!(req.url, "http://localhost:3000/views/active_users");

        let view = client.view("active_users");
        let req = view
            .build_aggregate(&[AggregateColumn::new("id", AggregateFunction::Count)], None)
            .unwrap();
        assert!(req.url.starts_with("http://localhost:3000/views/active_users/aggregate?columns="));
    }
}
