//! Payload builders and a cache wired to a mock catalog.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use papercache_core::{Config, Endpoints, PaperCache};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Opens a cache under `tmp` whose endpoints all point at `server_uri`.
///
/// Pacing and retries are off so tests observe every request once.
pub async fn open_cache(server_uri: &str, tmp: &TempDir) -> PaperCache {
    let endpoints = Endpoints::under(server_uri);
    let config = Config {
        data_dir: Some(tmp.path().to_path_buf()),
        rate_limit_ms: 0,
        harvest_delay_ms: 0,
        max_retries: 0,
        oai_url: Some(endpoints.oai_url),
        api_url: Some(endpoints.api_url),
        pdf_base_url: Some(endpoints.pdf_base_url),
        source_base_url: Some(endpoints.source_base_url),
        ..Config::default()
    };
    PaperCache::open(config, &CancellationToken::new())
        .await
        .expect("open cache")
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// A gzip'd tar of regular files. Names are written verbatim, so entries
/// like `../x` survive into the archive.
pub fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        let name_bytes = name.as_bytes();
        header.as_old_mut().name[..name_bytes.len()].copy_from_slice(name_bytes);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, *data).expect("tar append");
    }
    gzip(&builder.into_inner().expect("tar finish"))
}

/// Atom API feed with one entry per `(id, title)`.
pub fn atom_feed(entries: &[(&str, &str)]) -> String {
    let body: String = entries
        .iter()
        .map(|(id, title)| {
            format!(
                "<entry><id>http://arxiv.org/abs/{id}v1</id>\
                 <published>2023-01-02T00:00:00Z</published>\
                 <updated>2023-01-03T00:00:00Z</updated>\
                 <title>{title}</title><summary>About {title}.</summary>\
                 <author><name>Ada Lovelace</name></author>\
                 <category term=\"cs.LG\"/></entry>"
            )
        })
        .collect();
    format!("<?xml version=\"1.0\"?><feed xmlns=\"http://www.w3.org/2005/Atom\">{body}</feed>")
}

/// OAI-PMH `ListRecords` page. `None` marks the last page.
pub fn oai_page(ids: &[&str], next_token: Option<&str>) -> String {
    let records: String = ids
        .iter()
        .map(|id| {
            format!(
                "<record><header><identifier>oai:arXiv.org:{id}</identifier></header>\
                 <metadata><arXiv xmlns=\"http://arxiv.org/OAI/arXiv/\">\
                 <id>{id}</id><created>2023-01-02</created>\
                 <authors><author><keyname>Lovelace</keyname><forenames>Ada</forenames></author></authors>\
                 <title>Paper {id}</title><categories>cs.LG</categories>\
                 <abstract>Abstract {id}.</abstract></arXiv></metadata></record>"
            )
        })
        .collect();
    let token = match next_token {
        Some(token) => format!("<resumptionToken completeListSize=\"6\">{token}</resumptionToken>"),
        None => "<resumptionToken completeListSize=\"6\"/>".to_string(),
    };
    format!(
        "<?xml version=\"1.0\"?><OAI-PMH xmlns=\"http://www.openarchives.org/OAI/2.0/\">\
         <ListRecords>{records}{token}</ListRecords></OAI-PMH>"
    )
}
