//! Datafordeler GraphQL client for BBR buildings. Pages are chained with the
//! `endCursor` of the previous response until `hasNextPage` turns false.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::paging::{Harvest, Page, PageSource, Pages};
use super::transport::{HttpTransport, Transport};
use crate::config::DatafordelerConfig;
use crate::domain::BuildingRecord;
use crate::error::{RetrievalError, SetupError};

/// Server-side filter sent with every building query.
pub mod filter {
    /// Bumped whenever the criteria below change.
    pub const FILTER_VERSION: u32 = 1;

    /// BBR status code for a current, valid building.
    pub const STATUS_CURRENT: &str = "6";

    /// CRS of the spatial filter geometry.
    pub const CRS: u32 = 25832;

    /// `byg021BygningensAnvendelse` codes for residential, agricultural,
    /// commercial and institutional buildings (everything below 600).
    pub const USAGE_CODES: [&str; 96] = [
        "110", "120", "121", "122", "130", "131", "132", "140", "150", "160", "185", "190",
        "210", "211", "212", "213", "214", "215", "216", "217", "218", "219", "220", "221",
        "222", "223", "229", "230", "231", "232", "233", "234", "239", "290", "310", "311",
        "312", "313", "314", "315", "319", "320", "321", "322", "323", "324", "325", "329",
        "330", "331", "332", "333", "334", "339", "390", "410", "411", "412", "413", "414",
        "415", "416", "419", "420", "421", "422", "429", "430", "431", "432", "433", "439",
        "440", "441", "442", "443", "444", "449", "451", "490", "510", "520", "521", "522",
        "523", "529", "530", "531", "532", "533", "534", "535", "539", "540", "585", "590",
    ];
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const NODE_FIELDS: &str = "id_lokalId
      byg404Koordinat { wkt }
      byg021BygningensAnvendelse
      husnummer
      registreringFra
      registreringTil
      virkningFra
      virkningTil
      status
      byg007Bygningsnummer
      byg024AntalLejlighederMedKoekken
      byg025AntalLejlighederUdenKoekken
      byg030Vandforsyning";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
    #[serde(default)]
    errors: Vec<GraphQlMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphQlMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(rename = "BBR_Bygning")]
    buildings: Option<Connection>,
}

#[derive(Debug, Deserialize)]
struct Connection {
    #[serde(rename = "pageInfo")]
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(rename = "endCursor")]
    end_cursor: Option<String>,
    #[serde(rename = "hasNextPage", default)]
    has_next_page: bool,
}

/// Everything but the cursor that goes into a building query.
#[derive(Debug, Clone)]
pub struct BuildingQuery {
    pub geometry_wkt: String,
    pub page_size: u32,
    /// `virkningstid`: the point in time the buildings must be valid at
    pub valid_at: String,
    /// `registreringstid`: always the time the retrieval started
    pub registered_at: String,
}

impl BuildingQuery {
    pub fn new(geometry_wkt: &str, page_size: u32, as_of: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            geometry_wkt: geometry_wkt.to_string(),
            page_size,
            valid_at: as_of.unwrap_or(now).format(TIMESTAMP_FORMAT).to_string(),
            registered_at: now.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// GraphQL text for one page. `after` is the previous page's `endCursor`.
    pub fn to_graphql(&self, after: Option<&str>) -> String {
        let usage_codes = filter::USAGE_CODES
            .iter()
            .map(|code| format!("\"{}\"", code))
            .collect::<Vec<_>>()
            .join(",");
        let after = after
            .map(|cursor| format!("\n    after: {}", quote(cursor)))
            .unwrap_or_default();

        format!(
            r#"query {{
  BBR_Bygning(
    first: {first}
    virkningstid: {valid_at}
    registreringstid: {registered_at}
    where: {{
      status: {{eq: "{status}"}}
      byg021BygningensAnvendelse: {{in: [{usage_codes}]}}
      byg404Koordinat: {{
        intersects: {{
          crs: {crs}
          wkt: {wkt}
        }}
      }}
    }}{after}
  ) {{
    pageInfo {{
      endCursor
      hasNextPage
    }}
    nodes {{
      {fields}
    }}
  }}
}}"#,
            first = self.page_size,
            valid_at = quote(&self.valid_at),
            registered_at = quote(&self.registered_at),
            status = filter::STATUS_CURRENT,
            usage_codes = usage_codes,
            crs = filter::CRS,
            wkt = quote(&self.geometry_wkt),
            after = after,
            fields = NODE_FIELDS,
        )
    }
}

/// GraphQL string literal. JSON escaping is a subset of what GraphQL accepts.
fn quote(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

pub struct BuildingClient<T: Transport = HttpTransport> {
    transport: T,
    config: DatafordelerConfig,
    api_key: String,
}

impl BuildingClient<HttpTransport> {
    /// Fails before any network activity when the API key is missing.
    pub fn new(config: DatafordelerConfig) -> Result<Self> {
        config.require_api_key()?;
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(config, transport)?)
    }
}

impl<T: Transport> BuildingClient<T> {
    pub fn with_transport(config: DatafordelerConfig, transport: T) -> Result<Self, SetupError> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            transport,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.register,
            self.config.version
        )
    }

    /// Fetch current buildings whose coordinate lies inside a polygon
    ///
    /// Records come back in page-arrival order. A failure that survives the
    /// retry policy ends the loop and is reported in `interrupted` next to
    /// the records fetched before it.
    ///
    /// # Arguments
    /// * `geometry_wkt` - Search polygon as WKT in EPSG:25832
    /// * `as_of` - Point in time the buildings must be valid at (defaults to now)
    ///
    /// # Returns
    /// * `Harvest` with one record per node returned across all pages
    pub fn fetch_buildings(
        &self,
        geometry_wkt: &str,
        as_of: Option<DateTime<Utc>>,
    ) -> Harvest<BuildingRecord> {
        let query = BuildingQuery::new(geometry_wkt, self.config.page_size, as_of);
        debug!(
            filter_version = filter::FILTER_VERSION,
            valid_at = %query.valid_at,
            "Querying buildings"
        );
        let endpoint = self.endpoint();
        let mut source = BuildingPages {
            transport: &self.transport,
            url: format!("{}?apiKey={}", endpoint, self.api_key),
            endpoint,
            query,
        };
        let harvest = Harvest::collect(Pages::new(&mut source, self.config.paging()));

        match &harvest.interrupted {
            Some(err) => warn!(
                "Building retrieval stopped after {} pages with {} buildings: {}",
                harvest.pages,
                harvest.len(),
                err
            ),
            None => info!(
                "Fetched {} buildings in {} pages",
                harvest.len(),
                harvest.pages
            ),
        }
        harvest
    }
}

/// Cursor source over one building query.
struct BuildingPages<'a, T> {
    transport: &'a T,
    /// With the API key, only ever handed to the transport
    url: String,
    /// Without the API key, safe for errors and logs
    endpoint: String,
    query: BuildingQuery,
}

impl<T: Transport> PageSource for BuildingPages<'_, T> {
    type Record = BuildingRecord;
    type Cursor = String;

    fn fetch_page(
        &mut self,
        cursor: Option<&String>,
    ) -> Result<Page<BuildingRecord, String>, RetrievalError> {
        let body = json!({ "query": self.query.to_graphql(cursor.map(String::as_str)) });
        let response = self.transport.post_json(&self.url, &body)?;
        if !response.is_success() {
            return Err(RetrievalError::Status {
                status: response.status,
                url: self.endpoint.clone(),
            });
        }

        let parsed: GraphQlResponse = serde_json::from_str(&response.body)
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(RetrievalError::GraphQl(messages.join("; ")));
        }
        let connection = parsed
            .data
            .and_then(|d| d.buildings)
            .ok_or_else(|| RetrievalError::Malformed("missing data.BBR_Bygning".into()))?;

        let next = match (connection.page_info.has_next_page, connection.page_info.end_cursor) {
            (false, _) => None,
            (true, Some(cursor)) => Some(cursor),
            (true, None) => return Err(RetrievalError::MissingCursor),
        };

        let records = connection
            .nodes
            .into_iter()
            .map(BuildingRecord::from_node)
            .collect();

        Ok(Page { records, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::fake::ScriptedTransport;
    use chrono::TimeZone;
    use std::collections::HashSet;

    const PLAN_WKT: &str = "POLYGON((723000 6175000,723100 6175000,723100 6175100,723000 6175000))";

    fn config() -> DatafordelerConfig {
        DatafordelerConfig {
            page_delay_ms: 0,
            retry_backoff_ms: 0,
            ..DatafordelerConfig::default()
        }
        .with_api_key("test-key")
    }

    fn node(id: &str) -> Value {
        json!({
            "id_lokalId": id,
            "byg404Koordinat": {"wkt": "POINT(723050 6175020)"},
            "byg021BygningensAnvendelse": "120",
            "status": "6"
        })
    }

    fn page(ids: &[&str], has_next: bool, cursor: Option<&str>) -> String {
        json!({
            "data": {
                "BBR_Bygning": {
                    "pageInfo": {"endCursor": cursor, "hasNextPage": has_next},
                    "nodes": ids.iter().map(|id| node(id)).collect::<Vec<_>>()
                }
            }
        })
        .to_string()
    }

    fn sent_query(transport: &ScriptedTransport, index: usize) -> String {
        transport.requests.borrow()[index]
            .body
            .as_ref()
            .and_then(|b| b["query"].as_str())
            .unwrap()
            .to_string()
    }

    fn ids(harvest: &Harvest<BuildingRecord>) -> Vec<&str> {
        harvest
            .records
            .iter()
            .map(|r| r.local_id.as_deref().unwrap_or(""))
            .collect()
    }

    #[test]
    fn test_usage_codes_are_unique_three_digit_codes() {
        let unique: HashSet<_> = filter::USAGE_CODES.iter().collect();
        assert_eq!(unique.len(), filter::USAGE_CODES.len());
        for code in filter::USAGE_CODES {
            assert_eq!(code.len(), 3, "{}", code);
            let value: u16 = code.parse().unwrap();
            assert!((100..600).contains(&value), "{}", code);
        }
        assert!(unique.contains(&"110"));
        assert!(unique.contains(&"590"));
        assert_eq!(filter::STATUS_CURRENT, "6");
    }

    #[test]
    fn test_query_embeds_filter() {
        let query = BuildingQuery::new(PLAN_WKT, 100, None);
        let text = query.to_graphql(None);

        assert!(text.contains("first: 100"));
        assert!(text.contains(r#"status: {eq: "6"}"#));
        assert!(text.contains("crs: 25832"));
        assert!(text.contains(&format!("wkt: \"{}\"", PLAN_WKT)));
        for code in filter::USAGE_CODES {
            assert!(text.contains(&format!("\"{}\"", code)), "{}", code);
        }
        assert!(!text.contains("after:"));

        let next = query.to_graphql(Some("cursor-1"));
        assert!(next.contains(r#"after: "cursor-1""#));
    }

    #[test]
    fn test_query_timestamps() {
        let as_of = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        let query = BuildingQuery::new(PLAN_WKT, 100, Some(as_of));
        assert_eq!(query.valid_at, "2020-01-02T03:04:05Z");
        assert_ne!(query.registered_at, query.valid_at);
        assert!(query.registered_at.ends_with('Z'));
        assert!(query.to_graphql(None).contains(r#"virkningstid: "2020-01-02T03:04:05Z""#));

        let now = BuildingQuery::new(PLAN_WKT, 100, None);
        assert_eq!(now.valid_at, now.registered_at);
    }

    #[test]
    fn test_follows_cursor_until_last_page() {
        let transport = ScriptedTransport::new()
            .reply(200, page(&["a", "b"], true, Some("c1")))
            .reply(200, page(&["c"], true, Some("c2")))
            .reply(200, page(&["d"], false, Some("c3")));

        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert!(harvest.is_complete());
        assert_eq!(ids(&harvest), vec!["a", "b", "c", "d"]);
        assert_eq!(transport.request_count(), 3);
        assert!(!sent_query(&transport, 0).contains("after:"));
        assert!(sent_query(&transport, 1).contains(r#"after: "c1""#));
        assert!(sent_query(&transport, 2).contains(r#"after: "c2""#));
    }

    #[test]
    fn test_endpoint_and_key() {
        let transport = ScriptedTransport::new().reply(200, page(&[], false, None));
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(
            transport.urls(),
            vec!["https://graphql.datafordeler.dk/BBR/v1?apiKey=test-key"]
        );
    }

    #[test]
    fn test_missing_api_key_fails_before_any_request() {
        let transport = ScriptedTransport::new();
        let result = BuildingClient::with_transport(DatafordelerConfig::default(), &transport);
        assert!(matches!(result, Err(SetupError::MissingApiKey)));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_transient_failure_is_retried() {
        let transport = ScriptedTransport::new()
            .reply(200, page(&["a"], true, Some("c1")))
            .reply(503, "Service Unavailable")
            .reply(200, page(&["b"], false, None));

        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert!(harvest.is_complete());
        assert_eq!(ids(&harvest), vec!["a", "b"]);
        assert!(sent_query(&transport, 2).contains(r#"after: "c1""#));
    }

    #[test]
    fn test_timeouts_are_retried_until_budget_runs_out() {
        let timeout = || RetrievalError::Transport {
            message: "operation timed out".into(),
            transient: true,
        };
        let transport = ScriptedTransport::new()
            .fail(timeout())
            .reply(200, page(&["a"], true, Some("c1")))
            .fail(timeout())
            .fail(timeout())
            .fail(timeout())
            .fail(timeout());

        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(ids(&harvest), vec!["a"]);
        assert_eq!(harvest.interrupted, Some(timeout()));
        // one retried first page, then 1 + max_retries attempts at the second
        assert_eq!(transport.request_count(), 2 + 4);
    }

    #[test]
    fn test_malformed_response_keeps_earlier_pages() {
        let transport = ScriptedTransport::new()
            .reply(200, page(&["a"], true, Some("c1")))
            .reply(200, "<html>gateway</html>");

        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(ids(&harvest), vec!["a"]);
        assert!(matches!(harvest.interrupted, Some(RetrievalError::Malformed(_))));
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_unauthorized_is_not_retried() {
        let transport = ScriptedTransport::new().reply(401, "");
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert!(harvest.is_empty());
        match harvest.interrupted {
            Some(RetrievalError::Status { status, url }) => {
                assert_eq!(status, 401);
                assert!(!url.contains("test-key"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_graphql_errors_stop_retrieval() {
        let transport = ScriptedTransport::new()
            .reply(200, r#"{"data": null, "errors": [{"message": "invalid wkt"}]}"#);
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings("POLYGON((", None);

        assert_eq!(
            harvest.interrupted,
            Some(RetrievalError::GraphQl("invalid wkt".into()))
        );
    }

    #[test]
    fn test_next_page_without_cursor_is_an_error() {
        let transport = ScriptedTransport::new().reply(200, page(&["a"], true, None));
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(harvest.interrupted, Some(RetrievalError::MissingCursor));
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_page_limit_bounds_the_loop() {
        let mut transport = ScriptedTransport::new();
        for i in 0..5 {
            transport = transport.reply(200, page(&["x"], true, Some(&format!("c{}", i))));
        }
        let limited = DatafordelerConfig {
            max_pages: 2,
            ..config()
        };
        let client = BuildingClient::with_transport(limited, &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(harvest.len(), 2);
        assert_eq!(harvest.interrupted, Some(RetrievalError::PageLimit(2)));
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_node_without_coordinate_is_kept() {
        let body = json!({
            "data": {"BBR_Bygning": {
                "pageInfo": {"endCursor": null, "hasNextPage": false},
                "nodes": [{"id_lokalId": "no-coord", "byg404Koordinat": null, "status": "6"}]
            }}
        });
        let transport = ScriptedTransport::new().reply(200, body.to_string());
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert_eq!(ids(&harvest), vec!["no-coord"]);
        assert!(harvest.records[0].coordinate_wkt().is_none());
    }

    #[test]
    fn test_every_node_becomes_a_record() {
        let body = json!({
            "data": {"BBR_Bygning": {
                "pageInfo": {"endCursor": null, "hasNextPage": false},
                "nodes": [
                    {"id_lokalId": "a", "status": "6"},
                    {"id_lokalId": null, "status": "6"},
                    {"status": "6", "husnummer": 12}
                ]
            }}
        });
        let transport = ScriptedTransport::new().reply(200, body.to_string());
        let client = BuildingClient::with_transport(config(), &transport).unwrap();
        let harvest = client.fetch_buildings(PLAN_WKT, None);

        assert!(harvest.is_complete());
        assert_eq!(harvest.len(), 3);
        assert_eq!(ids(&harvest), vec!["a", "", ""]);
        assert_eq!(harvest.records[2].address_ref.as_deref(), Some("12"));
    }
}
