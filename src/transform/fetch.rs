//! URL → file, streamed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use tracing::debug;

use super::{ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::error::TransformError;
use crate::layout::file_name_of;

/// Limit on one request, from connect to the last body byte.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads the item's URL into its target.
///
/// The body is streamed into `<target>.part` and renamed on success, so a
/// broken transfer never leaves a file under the target name.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    client: Client,
}

impl HttpFetch {
    /// Build the shared client. Must not run on an async worker thread.
    pub fn new(timeout: Duration) -> Result<Self, TransformError> {
        let client = Client::builder()
            .user_agent(concat!("catalog-media/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transform for HttpFetch {
    fn name(&self) -> &'static str {
        "download"
    }

    fn apply(&self, item: &WorkItem, _input: &Path, output: &Path) -> Result<(), TransformError> {
        let url = item
            .url
            .as_deref()
            .ok_or_else(|| TransformError::Unsupported("item has no URL".into()))?;

        let mut response = self.client.get(url).send()?.error_for_status()?;

        ensure_parent(output)?;
        let partial = output.with_file_name(format!("{}.part", file_name_of(output)));
        let written = match stream_into(&mut response, &partial) {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }
        };
        std::fs::rename(&partial, output)?;

        debug!("Downloaded {url} → {} ({written} bytes)", output.display());
        Ok(())
    }
}

fn stream_into(response: &mut Response, path: &Path) -> Result<u64, TransformError> {
    let mut file = BufWriter::new(File::create(path)?);
    let written = response.copy_to(&mut file)?;
    file.flush()?;
    Ok(written)
}

/// Minimal HTTP/1.1 server on loopback: answers each path in `routes` with
/// its status and body, anything else with 404. Returns the base URL.
#[cfg(test)]
pub(crate) fn serve_routes(routes: Vec<(&'static str, u16, Vec<u8>)>) -> String {
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Ok(read_half) = stream.try_clone() else { continue };
            let mut reader = BufReader::new(read_half);
            let mut request_line = String::new();
            let _ = reader.read_line(&mut request_line);
            loop {
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap_or(0) <= 2 {
                    break;
                }
            }
            let path = request_line.split_whitespace().nth(1).unwrap_or("/");
            let (status, body) = routes
                .iter()
                .find(|(route, ..)| *route == path)
                .map(|(_, status, body)| (*status, body.clone()))
                .unwrap_or((404, b"not found".to_vec()));
            let head = format!(
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fetch() -> HttpFetch {
        HttpFetch::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn body_lands_under_target_name() {
        let base = serve_routes(vec![("/media/a.png", 200, b"PNGDATA".to_vec())]);
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out").join("01313414_105_000.png");
        let item = WorkItem::remote(
            0,
            format!("{base}/media/a.png"),
            PathBuf::from("sheet.xlsx"),
            target.clone(),
        );

        fetch().apply(&item, &item.source, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"PNGDATA");
        assert!(!tmp.path().join("out").join("01313414_105_000.png.part").exists());
    }

    #[test]
    fn http_error_leaves_nothing_behind() {
        let base = serve_routes(vec![]);
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("1313414.jpg");
        let item = WorkItem::remote(0, format!("{base}/gone.jpg"), PathBuf::from("s.csv"), target.clone());

        let err = fetch().apply(&item, &item.source, &target).unwrap_err();
        assert!(matches!(&err, TransformError::Download(text) if text.contains("404")), "{err}");
        assert!(!target.exists());
    }

    #[test]
    fn local_item_without_url_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let item = WorkItem::new(0, tmp.path().join("a.png"), vec![tmp.path().join("b.png")]);
        let err = fetch()
            .apply(&item, &item.source, &item.targets[0])
            .unwrap_err();
        assert!(matches!(err, TransformError::Unsupported(_)));
    }
}
