//! PixStu Cache - persistent cache for image generation results.
//!
//! Text-to-image, image-to-image and inpainting pipelines compute a
//! deterministic key from their inputs, look it up before running the model,
//! and store the result after a miss. The cache keeps each pipeline's
//! namespace within a byte budget (least recently used entries go first),
//! expires entries by age, and recreates its backing file if it becomes
//! corrupt.
//!
//! # Example
//!
//! ```rust,no_run
//! use pixstu_cache::{CacheConfig, CacheStore, Pipeline, Txt2ImgRequest};
//!
//! fn main() -> pixstu_cache::Result<()> {
//!     let config = CacheConfig::new(".pixstu/cache.sqlite", Pipeline::Txt2Img.namespace())
//!         .with_max_bytes(512 * 1024 * 1024)
//!         .with_ttl_seconds(12 * 3600);
//!     let store = CacheStore::open(config)?;
//!
//!     let request = Txt2ImgRequest {
//!         prompt: "pixel knight, idle pose".to_string(),
//!         seed: Some(42),
//!         ..Txt2ImgRequest::default()
//!     };
//!     let key = request.cache_key()?;
//!
//!     match store.get_image(&key)? {
//!         Some(image) => println!("cached {}x{}", image.width(), image.height()),
//!         None => println!("miss, run the pipeline and put_image the result"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod keys;

// Re-export commonly used types
pub use cache::{
    CacheBackend, CacheDb, CacheStore, Clock, EntryMeta, Eviction, ManualClock, NamespaceStats,
    SqliteBackend, SystemClock,
};
pub use config::{CacheConfig, PathsConfig, RuntimeConfig};
pub use error::{PixstuError, Result};
pub use keys::{
    bytes_fingerprint, fingerprint, image_fingerprint, Img2ImgRequest, InpaintRequest,
    LoraSelection, Pipeline, Txt2ImgRequest,
};

// Image type accepted and returned by the image helpers.
pub use image;
