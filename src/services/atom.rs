//! Elevation tile registry enumeration.
//!
//! The registry is a two-level tree of XML documents. The root descriptor
//! lists one sub-index per region as an attribute of its `Query` elements;
//! every sub-index is an atom feed whose `entry/link` hrefs are the tiles.

use futures::{Stream, StreamExt, TryStreamExt, stream};
use indicatif::ProgressBar;
use quick_xml::Reader;
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{AtomConfig, Manifest, ResourceRef};
use crate::storage::local::{read_optional, write_atomic};
use crate::utils::http::FetchClient;
use crate::utils::progress::item_bar;
use crate::utils::resolve_url;

/// Walks the registry and produces the tile manifest.
pub struct AtomEnumerator<'a> {
    client: &'a FetchClient,
    config: &'a AtomConfig,
    show_progress: bool,
}

impl<'a> AtomEnumerator<'a> {
    pub fn new(client: &'a FetchClient, config: &'a AtomConfig) -> Self {
        Self {
            client,
            config,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Read the root descriptor from the local cache, downloading and
    /// caching it verbatim when the cache is missing.
    pub async fn load_root(&self) -> Result<Vec<u8>> {
        let cache = &self.config.registry_cache;
        if let Some(bytes) = read_optional(cache).await? {
            log::info!("Using cached registry index {}", cache.display());
            return Ok(bytes);
        }

        log::info!("Downloading the registry index {}", self.config.feed_url);
        let fetched = self.client.get(&self.config.feed_url).await?;
        write_atomic(cache, &fetched.bytes).await?;
        Ok(fetched.bytes)
    }

    /// Sub-index URLs listed by the root descriptor, in document order.
    pub fn sub_indexes(&self, root: &[u8]) -> Result<Vec<String>> {
        let base = Url::parse(&self.config.feed_url)?;
        parse_root_descriptor(root, &self.config.sub_index_attribute, &base)
    }

    /// Lazily fetch each sub-index in turn and flatten its tiles.
    ///
    /// The first failed fetch ends the stream with that error.
    pub fn refs(
        &self,
        sub_indexes: Vec<String>,
        progress: ProgressBar,
    ) -> impl Stream<Item = Result<ResourceRef>> + '_ {
        stream::iter(sub_indexes)
            .then(move |url| {
                let progress = progress.clone();
                async move {
                    let refs = self.fetch_sub_index(&url).await?;
                    progress.inc(1);
                    Ok::<_, AppError>(stream::iter(
                        refs.into_iter().map(Ok::<ResourceRef, AppError>),
                    ))
                }
            })
            .try_flatten()
    }

    /// Run the whole two-level traversal and collect the manifest.
    pub async fn enumerate(&self) -> Result<Manifest> {
        let root = self.load_root().await?;
        let sub_indexes = self.sub_indexes(&root)?;
        if sub_indexes.is_empty() {
            log::warn!(
                "Registry index lists no sub-indexes (attribute {:?})",
                self.config.sub_index_attribute
            );
        } else {
            log::info!("Registry index lists {} sub-indexes", sub_indexes.len());
        }

        let progress = item_bar(
            sub_indexes.len() as u64,
            "Extracting tile URLs",
            self.show_progress,
        );
        let collected: Result<Vec<ResourceRef>> =
            self.refs(sub_indexes, progress.clone()).try_collect().await;
        progress.finish_and_clear();

        let manifest = Manifest::new(collected?);
        log::info!("Enumerated {} tiles", manifest.len());
        Ok(manifest)
    }

    async fn fetch_sub_index(&self, url: &str) -> Result<Vec<ResourceRef>> {
        let fetched = self.client.get(url).await?;
        let base = Url::parse(url)?;
        let refs = parse_sub_index(&fetched.bytes, &base)?;
        log::debug!("{} lists {} tiles", url, refs.len());
        Ok(refs)
    }
}

/// Extract sub-index URLs: attribute values of top-level `Query` elements
/// whose attribute name contains `attribute_fragment`.
pub fn parse_root_descriptor(
    xml: &[u8],
    attribute_fragment: &str,
    base: &Url,
) -> Result<Vec<String>> {
    let mut urls = Vec::new();
    visit_elements(xml, |path, element, decoder| {
        if path.len() != 1 || element.local_name().as_ref() != b"Query" {
            return Ok(());
        }
        for attr in element.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let name = String::from_utf8_lossy(attr.key.as_ref());
            if name.contains(attribute_fragment) {
                let value = attr.decode_and_unescape_value(decoder)?;
                urls.push(resolve_url(base, value.trim()));
            }
        }
        Ok(())
    })?;
    Ok(urls)
}

/// Extract tile references from the `link` elements of top-level `entry`
/// elements. Links without a usable href are skipped with a warning.
pub fn parse_sub_index(xml: &[u8], base: &Url) -> Result<Vec<ResourceRef>> {
    let mut refs = Vec::new();
    visit_elements(xml, |path, element, decoder| {
        let in_entry = path.len() == 2 && path[1] == b"entry";
        if !in_entry || element.local_name().as_ref() != b"link" {
            return Ok(());
        }

        let mut href = None;
        for attr in element.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.local_name().as_ref() == b"href" {
                href = Some(attr.decode_and_unescape_value(decoder)?.into_owned());
            }
        }

        match href {
            Some(href) => match ResourceRef::from_url(&resolve_url(base, href.trim())) {
                Ok(r) => refs.push(r),
                Err(e) => log::warn!("Skipping link in {}: {}", base, e),
            },
            None => log::warn!("Skipping link without href in {}", base),
        }
        Ok(())
    })?;
    Ok(refs)
}

/// Call `visit` for every element with the local names of its ancestors.
fn visit_elements<F>(xml: &[u8], mut visit: F) -> Result<()>
where
    F: FnMut(&[Vec<u8>], &BytesStart<'_>, Decoder) -> Result<()>,
{
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) => {
                saw_root = true;
                visit(&path, &element, reader.decoder())?;
                path.push(element.local_name().as_ref().to_vec());
            }
            Event::Empty(element) => {
                saw_root = true;
                visit(&path, &element, reader.decoder())?;
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(AppError::payload("registry", "document has no root element"));
    }
    Ok(())
}
