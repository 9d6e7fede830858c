//! src/fingerprint.rs
//! Fingerprinty avatarów: pobranie miniatury + hash różnicowy 9×8 (64 bity).
//!
//! Hash liczymy z siatki 9×8 luminancji: bit = 1, gdy piksel jest ciemniejszy
//! od prawego sąsiada. Sygnał gruby, czuły na rotację/kadr — wystarcza do
//! łapania masowo powielanych avatarów, niczego nie dowodzi kryptograficznie.
//!
//! Brak obrazka (Blocked/Pending/Error, timeout, nie-obraz) => hash = None;
//! taki członek nie wchodzi do klastrowania, ale zostaje w scoringu po nazwie.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::StreamExt;
use futures_util::future::join_all;
use moka::sync::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::debug;
use url::Url;

use crate::services::{Member, Thumbnail, ThumbnailService, ThumbnailState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub member_id: u64,
    pub hash: Option<u64>,
}

/// Dystans Hamminga między dwoma hashami 64-bit.
#[inline]
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/* ===========================
   Limity pobierania i cache
   =========================== */

const MAX_IMAGE_BYTES: u64 = 1_500_000;
const MAX_IMAGE_DIMENSION: u32 = 4096; // limit dekodera do 4096×4096
const HASH_CACHE_TTL_SECS: u64 = 60 * 60; // 1 h
const HASH_CACHE_CAPACITY: u64 = 4096;
const DOWNLOAD_PARALLELISM: usize = 4;

static CT_IMAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^image/").expect("static regex"));

pub struct FingerprintService {
    thumbnails: Arc<dyn ThumbnailService>,
    http: reqwest::Client,
    // Cache hashy po member_id z TTL — nowy skan tej samej grupy nie pobiera
    // avatarów od nowa.
    cache: Cache<u64, Option<u64>>,
    dl_sem: Arc<Semaphore>,
}

impl FingerprintService {
    pub fn new(thumbnails: Arc<dyn ThumbnailService>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("BotGuard-Fingerprint/0.1")
            .connect_timeout(Duration::from_millis(1_500))
            .timeout(Duration::from_millis(5_000))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;
        Ok(Self {
            thumbnails,
            http,
            cache: Cache::builder()
                .time_to_live(Duration::from_secs(HASH_CACHE_TTL_SECS))
                .max_capacity(HASH_CACHE_CAPACITY)
                .build(),
            dl_sem: Arc::new(Semaphore::new(DOWNLOAD_PARALLELISM)),
        })
    }

    /// Fingerprint dla paczki członków (zwykle jedna strona paginacji).
    /// Kolejność wyników = kolejność wejścia; błędy per-member nie są fatalne.
    pub async fn fingerprint(&self, members: &[Member]) -> Vec<Fingerprint> {
        let tasks = members.iter().map(|m| {
            let id = m.user_id;
            async move {
                Fingerprint {
                    member_id: id,
                    hash: self.hash_for_member(id).await,
                }
            }
        });
        join_all(tasks).await
    }

    async fn hash_for_member(&self, member_id: u64) -> Option<u64> {
        if let Some(cached) = self.cache.get(&member_id) {
            return cached;
        }

        let hash = self.resolve_and_hash(member_id).await;
        self.cache.insert(member_id, hash);
        hash
    }

    async fn resolve_and_hash(&self, member_id: u64) -> Option<u64> {
        let thumb: Thumbnail = match self.thumbnails.resolve_image(member_id).await {
            Ok(t) => t,
            Err(e) => {
                debug!(member_id, error = %e, "thumbnail resolve failed");
                return None;
            }
        };
        // Pending rozwiąże się kiedyś — nie czekamy na niego w skanie.
        if thumb.state != ThumbnailState::Completed {
            return None;
        }
        let url = thumb.url?;
        let bytes = self.download_image(&url).await?;
        dhash_from_bytes(&bytes).await.ok().flatten()
    }

    /// Pobranie obrazka z twardymi limitami: https, content-type image/*,
    /// sufit bajtów egzekwowany na streamie.
    async fn download_image(&self, url: &str) -> Option<Vec<u8>> {
        if !url_is_https(url) {
            return None;
        }
        let _permit = self.dl_sem.acquire().await.ok(); // delikatny throttle

        let resp = self.http.get(url).send().await.ok()?;
        if !url_is_https(resp.url().as_str()) {
            return None;
        }
        if !resp.status().is_success() {
            return None;
        }

        let is_image = {
            let ct_opt = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            matches!(ct_opt, Some(v) if CT_IMAGE_RE.is_match(v))
        };
        if !is_image {
            return None;
        }

        if let Some(len) = resp.content_length() {
            if len > MAX_IMAGE_BYTES {
                return None;
            }
        }

        let mut stream = resp.bytes_stream();
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.ok()?;
            if (bytes.len() as u64) + (chunk.len() as u64) > MAX_IMAGE_BYTES {
                return None;
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return None;
        }
        Some(bytes)
    }
}

fn url_is_https(url: &str) -> bool {
    matches!(Url::parse(url), Ok(u) if u.scheme() == "https")
}

/* ===========================
   Hash różnicowy 9×8
   =========================== */

/// Dekoduje bajty i liczy 64-bitowy hash różnicowy.
/// Dekodowanie jest CPU-bound, więc schodzi na `spawn_blocking`.
pub async fn dhash_from_bytes(bytes: &[u8]) -> Result<Option<u64>> {
    let data = bytes.to_vec();
    task::spawn_blocking(move || Ok(dhash_sync(&data)))
        .await
        .map_err(anyhow::Error::new)?
}

fn dhash_sync(data: &[u8]) -> Option<u64> {
    use image::{ImageReader, imageops::FilterType};
    use std::io::Cursor;

    let mut limits = image::Limits::default();
    limits.max_image_width = Some(MAX_IMAGE_DIMENSION);
    limits.max_image_height = Some(MAX_IMAGE_DIMENSION);

    // Najpierw sam nagłówek — za duże wymiary odrzucamy bez dekodowania.
    {
        let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format().ok()?;
        reader.limits(limits.clone());
        reader.into_dimensions().ok()?;
    }

    let mut reader = ImageReader::new(Cursor::new(data)).with_guessed_format().ok()?;
    reader.limits(limits);
    let img = reader.decode().ok()?;

    // Siatka 9×8; luminancja BT.601 liczona ręcznie (0.299/0.587/0.114).
    let small = img.resize_exact(9, 8, FilterType::Triangle).to_rgb8();
    let mut luma = [[0f32; 9]; 8];
    for (x, y, p) in small.enumerate_pixels() {
        let [r, g, b] = p.0;
        luma[y as usize][x as usize] =
            0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
    }

    // bit(y*8+x) = 1, gdy piksel < prawy sąsiad; wierszami.
    let mut bits: u64 = 0;
    for y in 0..8 {
        for x in 0..8 {
            if luma[y][x] < luma[y][x + 1] {
                bits |= 1u64 << (y * 8 + x);
            }
        }
    }
    Some(bits)
}
