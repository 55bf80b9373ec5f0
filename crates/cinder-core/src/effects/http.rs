//! HTTP stream sources for `http(s)://` locators.
//!
//! The response body is wrapped in a `ReadOnlySource`, so remote streams
//! cannot seek and report no length until the decoder finds one.

use symphonia::core::io::{MediaSourceStream, ReadOnlySource};

pub fn open_url(url: &str) -> Result<MediaSourceStream, Box<dyn std::error::Error>> {
    log::info!("cinder: opening {}", url);
    let response = ureq::get(url).call()?;
    let reader = response.into_body().into_reader();
    Ok(MediaSourceStream::new(
        Box::new(ReadOnlySource::new(reader)),
        Default::default(),
    ))
}

/// Extension of the last path segment, ignoring query and fragment.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

pub fn is_http_url(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}
