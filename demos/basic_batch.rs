//! Basic batch example
//!
//! This example demonstrates the core functionality of batch-dl:
//! - Creating a downloader instance
//! - Subscribing to events
//! - Submitting a batch of URLs given on the command line
//! - Monitoring aggregate progress until the batch ends
//! - Cancelling with Ctrl+C
//!
//! ```bash
//! cargo run --example basic_batch -- https://example.com/a.zip https://example.com/b.zip
//! ```

use batch_dl::config::{Config, DownloadConfig};
use batch_dl::{BatchDownloader, Event, Request, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    let requests = std::env::args()
        .skip(1)
        .map(Request::new)
        .collect::<Result<Vec<_>, _>>()?;
    if requests.is_empty() {
        eprintln!("usage: basic_batch <url>...");
        return Ok(());
    }

    let config = Config {
        download: DownloadConfig {
            output_dir: "downloads".into(),
            ..Default::default()
        },
        ..Default::default()
    };

    let downloader = BatchDownloader::new(config).await?;

    // Subscribe before submitting so Calculating is not missed
    let mut events = downloader.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                Event::Calculating { progress } => {
                    println!("⏳ Calculating sizes for {} files", progress.files_remaining);
                }
                Event::Progress { progress } => {
                    if let Some(percent) = progress.percent() {
                        println!(
                            "↓ {}% ({} / {} bytes, {} files left)",
                            percent,
                            progress.bytes_downloaded,
                            progress.total_expected_bytes,
                            progress.files_remaining
                        );
                    }
                }
                Event::FileDownloaded { filename, filepath, .. } => {
                    println!("✓ {} -> {}", filename, filepath.display());
                }
                Event::Error { failing_url, .. } => {
                    println!("✗ {}", failing_url);
                }
                Event::Complete { progress } => {
                    println!(
                        "✓ Batch complete: {} bytes, {} errors",
                        progress.bytes_downloaded, progress.error_count
                    );
                }
                Event::Cancelled { .. } => {
                    println!("⚠ Batch cancelled");
                }
            }
            if event.is_terminal() {
                break;
            }
        }
    });

    downloader.submit_all(requests);

    // Whichever comes first: the batch ends, or Ctrl+C shuts the engine down
    let shutdown = run_with_shutdown(downloader.clone());
    tokio::select! {
        _ = printer => {}
        result = shutdown => result?,
    }

    Ok(())
}
