//! OAI-PMH `ListRecords` client using the `arXiv` metadata format.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::{MetadataSource, Page, PageRequest, RemoteError, squash_whitespace};
use crate::download::{DownloadError, HttpClient, RateLimiter, RetryPolicy, with_retry};
use crate::paper::Paper;

const METADATA_PREFIX: &str = "arXiv";
const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// OAI-PMH harvesting client.
#[derive(Debug, Clone)]
pub struct OaiClient {
    http: HttpClient,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
    retry_policy: RetryPolicy,
}

impl OaiClient {
    #[must_use]
    pub fn new(
        http: HttpClient,
        base_url: impl Into<String>,
        rate_limiter: Arc<RateLimiter>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            rate_limiter,
            retry_policy,
        }
    }

    /// Builds the request URL. A token request carries only the verb and token.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Http`] if the base URL is invalid.
    pub fn request_url(&self, request: &PageRequest) -> Result<String, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|_| RemoteError::Http(DownloadError::invalid_url(&self.base_url)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("verb", "ListRecords");
            if let Some(token) = &request.token {
                query.append_pair("resumptionToken", token);
            } else {
                query.append_pair("metadataPrefix", METADATA_PREFIX);
                if let Some(set) = &request.set {
                    query.append_pair("set", set);
                }
                if let Some(from) = request.from {
                    query.append_pair("from", &from.format("%Y-%m-%d").to_string());
                }
                if let Some(until) = request.until {
                    query.append_pair("until", &until.format("%Y-%m-%d").to_string());
                }
            }
        }
        Ok(url.into())
    }
}

#[async_trait]
impl MetadataSource for OaiClient {
    #[instrument(skip(self, cancel), fields(resuming = request.token.is_some()))]
    async fn list_records(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<Page, RemoteError> {
        let url = self.request_url(request)?;
        let body = with_retry(&self.retry_policy, &self.rate_limiter, &url, cancel, || {
            self.http.get_text(&url)
        })
        .await
        .map_err(RemoteError::from_http)?;

        let page = parse_list_records(&url, &body)?;
        debug!(
            records = page.records.len(),
            has_more = page.next_token.is_some(),
            total = ?page.total_size,
            "received OAI-PMH page"
        );
        Ok(page)
    }
}

/// Parses a `ListRecords` response document.
pub(crate) fn parse_list_records(url: &str, body: &str) -> Result<Page, RemoteError> {
    let response: OaiResponse =
        quick_xml::de::from_str(body).map_err(|e| RemoteError::parse(url, e))?;

    if let Some(error) = response.error {
        if error.code == NO_RECORDS_MATCH {
            return Ok(Page::default());
        }
        return Err(RemoteError::Protocol {
            code: error.code,
            message: error.message.trim().to_string(),
        });
    }

    let Some(list) = response.list_records else {
        return Err(RemoteError::parse(url, "missing ListRecords element"));
    };

    let records = list
        .records
        .into_iter()
        .filter_map(|record| record.metadata)
        .map(|metadata| metadata.arxiv.into_paper())
        .filter(|paper| !paper.id.is_empty())
        .collect();

    let (next_token, total_size) = match list.resumption_token {
        Some(token) => {
            let value = token.value.trim();
            let next = (!value.is_empty()).then(|| value.to_string());
            (next, token.complete_list_size)
        }
        None => (None, None),
    };

    Ok(Page {
        records,
        next_token,
        total_size,
    })
}

#[derive(Debug, Deserialize)]
struct OaiResponse {
    #[serde(default)]
    error: Option<OaiError>,
    #[serde(rename = "ListRecords", default)]
    list_records: Option<OaiListRecords>,
}

#[derive(Debug, Deserialize)]
struct OaiError {
    #[serde(rename = "@code")]
    code: String,
    #[serde(rename = "$text", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OaiListRecords {
    #[serde(rename = "record", default)]
    records: Vec<OaiRecord>,
    #[serde(rename = "resumptionToken", default)]
    resumption_token: Option<OaiResumptionToken>,
}

#[derive(Debug, Deserialize)]
struct OaiResumptionToken {
    #[serde(rename = "$text", default)]
    value: String,
    #[serde(rename = "@completeListSize", default)]
    complete_list_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OaiRecord {
    /// Absent for deleted records.
    #[serde(default)]
    metadata: Option<OaiMetadata>,
}

#[derive(Debug, Deserialize)]
struct OaiMetadata {
    #[serde(rename = "arXiv")]
    arxiv: ArxivRecord,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArxivRecord {
    id: String,
    created: String,
    updated: String,
    title: String,
    authors: ArxivAuthors,
    categories: String,
    comments: String,
    #[serde(rename = "journal-ref")]
    journal_ref: String,
    doi: String,
    license: String,
    #[serde(rename = "abstract")]
    abstract_text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ArxivAuthors {
    #[serde(rename = "author", default)]
    authors: Vec<ArxivAuthor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArxivAuthor {
    keyname: String,
    forenames: String,
    suffix: String,
}

impl ArxivAuthor {
    fn display_name(&self) -> String {
        let mut name = format!("{} {}", self.forenames.trim(), self.keyname.trim());
        if !self.suffix.trim().is_empty() {
            name.push(' ');
            name.push_str(self.suffix.trim());
        }
        name.trim().to_string()
    }
}

impl ArxivRecord {
    fn into_paper(self) -> Paper {
        let created = parse_date(&self.created);
        let updated = parse_date(&self.updated).or(created);
        let authors = self
            .authors
            .authors
            .iter()
            .map(ArxivAuthor::display_name)
            .collect::<Vec<_>>()
            .join(", ");

        Paper {
            created,
            updated,
            title: squash_whitespace(&self.title),
            abstract_text: self.abstract_text.trim().to_string(),
            authors,
            categories: squash_whitespace(&self.categories),
            comments: self.comments.trim().to_string(),
            journal_ref: self.journal_ref.trim().to_string(),
            doi: self.doi.trim().to_string(),
            license: self.license.trim().to_string(),
            ..Paper::new(self.id.trim())
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-01T00:00:00Z</responseDate>
  <request verb="ListRecords">http://export.arxiv.org/oai2</request>
  <ListRecords>
    <record>
      <header><identifier>oai:arXiv.org:1706.03762</identifier><datestamp>2023-08-03</datestamp><setSpec>cs</setSpec></header>
      <metadata>
        <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
          <id>1706.03762</id>
          <created>2017-06-12</created>
          <updated>2023-08-02</updated>
          <authors>
            <author><keyname>Vaswani</keyname><forenames>Ashish</forenames></author>
            <author><keyname>King</keyname><forenames>Martin Luther</forenames><suffix>Jr</suffix></author>
          </authors>
          <title>Attention Is All
  You Need</title>
          <categories>cs.CL cs.LG</categories>
          <comments>15 pages</comments>
          <license>http://arxiv.org/licenses/nonexclusive-distrib/1.0/</license>
          <abstract>  The dominant sequence transduction models...  </abstract>
        </arXiv>
      </metadata>
    </record>
    <record>
      <header status="deleted"><identifier>oai:arXiv.org:1706.00000</identifier><datestamp>2023-08-03</datestamp></header>
    </record>
    <record>
      <header><identifier>oai:arXiv.org:hep-th/9901001</identifier><datestamp>2023-08-03</datestamp></header>
      <metadata>
        <arXiv xmlns="http://arxiv.org/OAI/arXiv/">
          <id>hep-th/9901001</id>
          <created>1999-01-01</created>
          <authors><author><keyname>Witten</keyname><forenames>Edward</forenames></author></authors>
          <title>Legacy</title>
          <categories>hep-th</categories>
          <journal-ref>Nucl.Phys. B1 (1999)</journal-ref>
          <abstract>Old.</abstract>
        </arXiv>
      </metadata>
    </record>
    <resumptionToken cursor="0" completeListSize="2500">6960524|1001</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    const LAST_PAGE: &str = r#"<OAI-PMH><ListRecords>
    <record><header><identifier>x</identifier></header><metadata><arXiv><id>2301.00001</id><title>T</title></arXiv></metadata></record>
    <resumptionToken cursor="2000" completeListSize="2001"/>
  </ListRecords></OAI-PMH>"#;

    fn client(base: &str) -> OaiClient {
        OaiClient::new(
            HttpClient::new(),
            base,
            Arc::new(RateLimiter::disabled()),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(5), 2.0),
        )
    }

    #[test]
    fn test_parse_page() {
        let page = parse_list_records("u", PAGE).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next_token.as_deref(), Some("6960524|1001"));
        assert_eq!(page.total_size, Some(2500));

        let first = &page.records[0];
        assert_eq!(first.id, "1706.03762");
        assert_eq!(first.title, "Attention Is All You Need");
        assert_eq!(first.authors, "Ashish Vaswani, Martin Luther King Jr");
        assert_eq!(first.categories, "cs.CL cs.LG");
        assert_eq!(first.abstract_text, "The dominant sequence transduction models...");
        assert_eq!(first.created, NaiveDate::from_ymd_opt(2017, 6, 12));
        assert_eq!(first.updated, NaiveDate::from_ymd_opt(2023, 8, 2));

        let legacy = &page.records[1];
        assert_eq!(legacy.id, "hep-th/9901001");
        assert_eq!(legacy.updated, legacy.created, "updated defaults to created");
        assert_eq!(legacy.journal_ref, "Nucl.Phys. B1 (1999)");
    }

    #[test]
    fn test_parse_last_page_has_no_token() {
        let page = parse_list_records("u", LAST_PAGE).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_token, None);
        assert_eq!(page.total_size, Some(2001));
    }

    #[test]
    fn test_parse_no_records_match_is_empty_completion() {
        let body = r#"<OAI-PMH><error code="noRecordsMatch">No records</error></OAI-PMH>"#;
        let page = parse_list_records("u", body).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn test_parse_protocol_error() {
        let body = r#"<OAI-PMH><error code="badResumptionToken">expired</error></OAI-PMH>"#;
        let err = parse_list_records("u", body).unwrap_err();
        assert!(matches!(err, RemoteError::Protocol { ref code, .. } if code == "badResumptionToken"));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_list_records("u", "<html><body>oops"),
            Err(RemoteError::Parse { .. })
        ));
    }

    #[test]
    fn test_request_url_first_page_and_token() {
        let c = client("https://export.arxiv.org/oai2");
        let first = c
            .request_url(&PageRequest::first(
                Some("cs".into()),
                NaiveDate::from_ymd_opt(2024, 1, 2),
                None,
            ))
            .unwrap();
        assert_eq!(
            first,
            "https://export.arxiv.org/oai2?verb=ListRecords&metadataPrefix=arXiv&set=cs&from=2024-01-02"
        );

        let resumed = c.request_url(&PageRequest::resume("6960524|1001")).unwrap();
        assert_eq!(
            resumed,
            "https://export.arxiv.org/oai2?verb=ListRecords&resumptionToken=6960524%7C1001"
        );
    }

    #[tokio::test]
    async fn test_list_records_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oai2"))
            .and(query_param("resumptionToken", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LAST_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let page = client(&format!("{}/oai2", server.uri()))
            .list_records(&PageRequest::resume("abc"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.records[0].id, "2301.00001");
    }

    #[tokio::test]
    async fn test_list_records_503_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oai2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&format!("{}/oai2", server.uri()))
            .list_records(&PageRequest::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::RateLimited { .. }));
    }
}
