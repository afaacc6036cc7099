use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct TerrainMetrics {
    // Elevation tiles
    pub total_tiles_fetched: AtomicUsize,
    pub total_tile_bytes_fetched: AtomicUsize,
    pub total_tile_fetch_time_us: AtomicU64,
    pub total_tiles_found_locally: AtomicUsize,
    pub total_tiles_not_found: AtomicUsize,
    pub total_tiles_synthesized: AtomicUsize,
    pub total_tile_fetch_failures: AtomicUsize,

    // Chunk generation
    pub total_chunks_generated: AtomicUsize,
    pub total_generation_time_us: AtomicU64,
    pub max_generation_time_us: AtomicU64,
    pub total_generation_failures: AtomicUsize,
    pub total_chunk_bytes_written: AtomicUsize,

    // Metadata writes
    pub total_metadata_writes: AtomicUsize,
    pub total_write_wait_us: AtomicU64,
    pub max_write_wait_us: AtomicU64,

    // Requests
    pub total_artifacts_served: AtomicUsize,
    pub total_bytes_served: AtomicUsize,
    pub total_accepted: AtomicUsize,
    pub total_generations_launched: AtomicUsize,
    pub total_inconsistencies: AtomicUsize,

    // Session
    pub start_time: Option<Instant>,
    pub config_summary: String,
}

fn micros(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

fn avg_ms(total_us: u64, count: usize) -> f64 {
    if count > 0 { total_us as f64 / 1000.0 / count as f64 } else { 0.0 }
}

impl TerrainMetrics {
    pub fn new(config_summary: String) -> Self {
        Self {
            start_time: Some(Instant::now()),
            config_summary,
            ..Default::default()
        }
    }

    pub fn record_tile_fetch(&self, duration: Duration, bytes: usize) {
        self.total_tiles_fetched.fetch_add(1, Ordering::Relaxed);
        self.total_tile_bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
        self.total_tile_fetch_time_us.fetch_add(micros(duration), Ordering::Relaxed);
    }

    pub fn record_tile_found_locally(&self) {
        self.total_tiles_found_locally.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tile_not_found(&self) {
        self.total_tiles_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tile_synthesized(&self) {
        self.total_tiles_synthesized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tile_fetch_failure(&self) {
        self.total_tile_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation(&self, duration: Duration, artifact_bytes: usize) {
        self.total_chunks_generated.fetch_add(1, Ordering::Relaxed);
        let us = micros(duration);
        self.total_generation_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_generation_time_us.fetch_max(us, Ordering::Relaxed);
        self.total_chunk_bytes_written.fetch_add(artifact_bytes, Ordering::Relaxed);
    }

    pub fn record_generation_failure(&self) {
        self.total_generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Time a background task spent waiting for a metadata write permit.
    pub fn record_write_wait(&self, waited: Duration) {
        self.total_metadata_writes.fetch_add(1, Ordering::Relaxed);
        let us = micros(waited);
        self.total_write_wait_us.fetch_add(us, Ordering::Relaxed);
        self.max_write_wait_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn record_served(&self, bytes: usize) {
        self.total_artifacts_served.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation_launched(&self) {
        self.total_generations_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inconsistency(&self) {
        self.total_inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn generate_report(&self) -> String {
        let uptime = self.start_time.unwrap_or_else(Instant::now).elapsed();

        let fetched = self.total_tiles_fetched.load(Ordering::Relaxed);
        let fetch_avg = avg_ms(self.total_tile_fetch_time_us.load(Ordering::Relaxed), fetched);
        let fetched_mb = self.total_tile_bytes_fetched.load(Ordering::Relaxed) as f64 / 1024.0 / 1024.0;

        let generated = self.total_chunks_generated.load(Ordering::Relaxed);
        let gen_avg = avg_ms(self.total_generation_time_us.load(Ordering::Relaxed), generated);
        let gen_max = self.max_generation_time_us.load(Ordering::Relaxed) as f64 / 1000.0;
        let written_mb = self.total_chunk_bytes_written.load(Ordering::Relaxed) as f64 / 1024.0 / 1024.0;

        let writes = self.total_metadata_writes.load(Ordering::Relaxed);
        let wait_avg = avg_ms(self.total_write_wait_us.load(Ordering::Relaxed), writes);
        let wait_max = self.max_write_wait_us.load(Ordering::Relaxed) as f64 / 1000.0;

        let served = self.total_artifacts_served.load(Ordering::Relaxed);
        let accepted = self.total_accepted.load(Ordering::Relaxed);
        let total_requests = served + accepted;
        let hit_rate = if total_requests > 0 { (served as f64 / total_requests as f64) * 100.0 } else { 0.0 };

        format!(
            "terramesh Report\n\
             ================\n\
             Configuration: {}\n\
             Session Duration: {:.2?}\n\n\
             [Elevation Tiles]\n\
             Fetched: {} ({:.1} MB, avg {:.2} ms)\n\
             Found Locally: {}\n\
             Not Found At Source: {}\n\
             Synthesized Flat: {}\n\
             Fetch Failures: {}\n\n\
             [Generation]\n\
             Launched: {}\n\
             Chunks Generated: {}\n\
             Avg Time: {:.2} ms/chunk\n\
             Max Time: {:.2} ms\n\
             Failures: {}\n\
             Artifacts Written: {:.1} MB\n\n\
             [Metadata Writes]\n\
             Writes: {}\n\
             Avg Permit Wait: {:.2} ms\n\
             Max Permit Wait: {:.2} ms\n\n\
             [Requests]\n\
             Served: {} ({} bytes)\n\
             Accepted (202): {}\n\
             Ready Rate: {:.1}%\n\
             Inconsistencies Healed: {}\n",
            self.config_summary,
            uptime,
            fetched, fetched_mb, fetch_avg,
            self.total_tiles_found_locally.load(Ordering::Relaxed),
            self.total_tiles_not_found.load(Ordering::Relaxed),
            self.total_tiles_synthesized.load(Ordering::Relaxed),
            self.total_tile_fetch_failures.load(Ordering::Relaxed),
            self.total_generations_launched.load(Ordering::Relaxed),
            generated, gen_avg, gen_max,
            self.total_generation_failures.load(Ordering::Relaxed),
            written_mb,
            writes, wait_avg, wait_max,
            served, self.total_bytes_served.load(Ordering::Relaxed),
            accepted, hit_rate,
            self.total_inconsistencies.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts() {
        let metrics = TerrainMetrics::new("test".to_string());
        metrics.record_generation(Duration::from_millis(4), 16919);
        metrics.record_generation(Duration::from_millis(2), 16919);
        metrics.record_served(16919);
        metrics.record_accepted();

        assert_eq!(metrics.total_chunks_generated.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.max_generation_time_us.load(Ordering::Relaxed), 4000);

        let report = metrics.generate_report();
        assert!(report.contains("Chunks Generated: 2"));
        assert!(report.contains("Avg Time: 3.00 ms/chunk"));
        assert!(report.contains("Ready Rate: 50.0%"));
    }
}
