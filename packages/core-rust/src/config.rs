/// Controls how provenance fields are read from inbound requests.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Proxy header carrying the original client address list.
    pub forwarded_for_header: String,
    /// Header carrying the request correlation id. `None` disables
    /// correlation id capture entirely.
    pub correlation_id_header: Option<String>,
    /// Index (after splitting on `/`) of the segment recorded as `path`.
    /// `/api/<resource>/<id>` puts the resource at index 2.
    pub path_segment: usize,
    /// Index of the segment recorded as the domain object id.
    pub object_id_segment: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            forwarded_for_header: "x-forwarded-for".to_string(),
            correlation_id_header: Some("x-correlation-id".to_string()),
            path_segment: 2,
            object_id_segment: 3,
        }
    }
}
