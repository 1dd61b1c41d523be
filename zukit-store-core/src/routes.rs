//! REST request locators and bodies
//!
//! Reads are `GET <api base><route>/?key=<key>&<params>&router=<router>`;
//! writes are `POST <api base><route>` with an [`UpdateBody`]. Every request
//! carries the `router` that identifies which plugin instance should answer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::value::ValueRequest;

/// Query parameter naming the plugin instance that owns a request.
pub const ROUTER_PARAM: &str = "router";

/// Routes used by a store for reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestRoutes {
    pub get: String,
    pub update: String,
}

impl Default for RestRoutes {
    fn default() -> Self {
        Self {
            get: "option".to_string(),
            update: "options".to_string(),
        }
    }
}

impl RestRoutes {
    /// Same route for reads and writes.
    pub fn single(route: impl Into<String>) -> Self {
        let route = route.into();
        Self {
            get: route.clone(),
            update: route,
        }
    }
}

/// Join `route` to `api_base` unless it is already rooted there.
///
/// Leading and trailing slashes of the route are dropped.
pub fn route_path(api_base: &str, route: &str) -> String {
    if route.starts_with(api_base) {
        return route.trim_end_matches('/').to_string();
    }
    format!("{}{}", api_base, route.trim_matches('/'))
}

/// Build a request path with a serialized query.
///
/// Pairs with a `null` value are skipped, arrays and objects are sent as
/// JSON text. `router` is appended unless the query already names one.
/// Without any query the bare route path is returned.
pub fn request_url<'a, I>(api_base: &str, route: &str, query: I, router: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a Value)>,
{
    let mut has_router = false;
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut empty = true;

    for (name, value) in query {
        let Some(text) = query_text(value) else {
            continue;
        };
        has_router |= name == ROUTER_PARAM;
        serializer.append_pair(name, &text);
        empty = false;
    }
    if let (false, Some(router)) = (has_router, router) {
        serializer.append_pair(ROUTER_PARAM, router);
        empty = false;
    }

    let path = route_path(api_base, route);
    if empty {
        path
    } else {
        format!("{}/?{}", path, serializer.finish())
    }
}

fn query_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        other => Some(other.to_string()),
    }
}

/// Path of the GET that resolves `request`: `key` first, then its params.
pub fn value_url(api_base: &str, route: &str, request: &ValueRequest, router: Option<&str>) -> String {
    let key = Value::String(request.key.clone());
    let query = std::iter::once(("key", &key))
        .chain(request.params.iter().map(|(k, v)| (k.as_str(), v)));
    request_url(api_base, route, query, router)
}

/// Body of a batched write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBody {
    pub router: Option<String>,
    pub keys: Vec<String>,
    pub values: Map<String, Value>,
}

impl UpdateBody {
    pub fn new(router: Option<&str>, values: Map<String, Value>) -> Self {
        Self {
            router: router.map(str::to_string),
            keys: values.keys().cloned().collect(),
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BASE: &str = "/zukit/v1/";

    #[test]
    fn test_route_path() {
        assert_eq!(route_path(BASE, "option"), "/zukit/v1/option");
        assert_eq!(route_path(BASE, "/option/"), "/zukit/v1/option");
        assert_eq!(route_path(BASE, "/zukit/v1/zudata/"), "/zukit/v1/zudata");
    }

    #[test]
    fn test_value_url_with_router() {
        let request = ValueRequest::new("foo");
        assert_eq!(
            value_url(BASE, "option", &request, Some("myplugin")),
            "/zukit/v1/option/?key=foo&router=myplugin"
        );
    }

    #[test]
    fn test_value_url_params_and_encoding() {
        let request = ValueRequest::new("svg")
            .param("name", "logo")
            .param("folder", "images/");
        assert_eq!(
            value_url(BASE, "zudata", &request, None),
            "/zukit/v1/zudata/?key=svg&folder=images%2F&name=logo"
        );
    }

    #[test]
    fn test_request_url_skips_null_and_encodes_arrays() {
        let ids = json!([1, 2]);
        let none = Value::Null;
        let url = request_url(BASE, "custom", [("ids", &ids), ("skip", &none)], None);
        assert_eq!(url, "/zukit/v1/custom/?ids=%5B1%2C2%5D");
    }

    #[test]
    fn test_request_url_keeps_explicit_router() {
        let router = json!("other");
        let url = request_url(BASE, "option", [("router", &router)], Some("mine"));
        assert_eq!(url, "/zukit/v1/option/?router=other");
    }

    #[test]
    fn test_request_url_without_query() {
        assert_eq!(request_url(BASE, "options", std::iter::empty(), None), "/zukit/v1/options");
    }

    #[test]
    fn test_update_body_shape() {
        let mut values = Map::new();
        values.insert("a".into(), json!(1));
        values.insert("b.c".into(), Value::Null);
        let body = UpdateBody::new(Some("mine"), values);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({ "router": "mine", "keys": ["a", "b.c"], "values": { "a": 1, "b.c": null } })
        );
    }
}
