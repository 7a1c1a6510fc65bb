mod fetcher;

pub use fetcher::{SampleFetcher, SampleSource};
