//! Generic offset-paged JSON endpoint

use crate::fetcher::http::{HttpRequest, Transport};
use crate::fetcher::{FetchError, FetchResult, Page, PageFetcher, PageRequest};
use crate::Table;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// [`PageFetcher`] for JSON APIs addressed by offset and length parameters.
///
/// Records are read from `records_pointer` (a JSON pointer to an array of
/// objects) and the total from `total_pointer`, when configured.
#[derive(Debug, Clone)]
pub struct OffsetPagedEndpoint<T> {
    transport: T,
    request: HttpRequest,
    offset_param: String,
    length_param: String,
    records_pointer: String,
    total_pointer: Option<String>,
}

impl<T: Transport> OffsetPagedEndpoint<T> {
    /// Endpoint using `offset` / `length` parameters and a top-level `data` array
    pub fn new(transport: T, request: HttpRequest) -> Self {
        Self {
            transport,
            request,
            offset_param: "offset".to_string(),
            length_param: "length".to_string(),
            records_pointer: "/data".to_string(),
            total_pointer: None,
        }
    }

    /// Override the offset and length parameter names
    pub fn with_params(mut self, offset: impl Into<String>, length: impl Into<String>) -> Self {
        self.offset_param = offset.into();
        self.length_param = length.into();
        self
    }

    /// Read records from `pointer`
    pub fn with_records_at(mut self, pointer: impl Into<String>) -> Self {
        self.records_pointer = pointer.into();
        self
    }

    /// Read the total record count from `pointer`
    pub fn with_total_at(mut self, pointer: impl Into<String>) -> Self {
        self.total_pointer = Some(pointer.into());
        self
    }

    fn page_request(&self, page: PageRequest) -> HttpRequest {
        self.request
            .clone()
            .with_query(self.offset_param.as_str(), page.offset.to_string())
            .with_query(self.length_param.as_str(), page.limit.to_string())
    }

    fn records(&self, body: &Value) -> FetchResult<Vec<Map<String, Value>>> {
        let records = body
            .pointer(&self.records_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                FetchError::Parse(format!("no record array at '{}'", self.records_pointer))
            })?;

        records
            .iter()
            .map(|record| {
                record
                    .as_object()
                    .cloned()
                    .ok_or_else(|| FetchError::Parse("record is not a JSON object".to_string()))
            })
            .collect()
    }

    fn total(&self, body: &Value) -> FetchResult<Option<u64>> {
        let Some(pointer) = &self.total_pointer else {
            return Ok(None);
        };

        match body.pointer(pointer) {
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| FetchError::Parse(format!("total at '{pointer}' is not a count"))),
            Some(Value::String(s)) => s
                .parse::<u64>()
                .map(Some)
                .map_err(|e| FetchError::Parse(format!("total at '{pointer}': {e}"))),
            _ => Err(FetchError::Parse(format!("no total at '{pointer}'"))),
        }
    }
}

#[async_trait]
impl<T: Transport> PageFetcher for OffsetPagedEndpoint<T> {
    async fn fetch_page(&self, request: PageRequest) -> FetchResult<Page> {
        let body = self.transport.get_json(&self.page_request(request)).await?;
        let table = Table::from_records(&self.records(&body)?);
        let total_records = self.total(&body)?;

        Ok(Page {
            table,
            total_records,
        })
    }
}
