//! Model training script
//!
//! Usage: cargo run --bin train_model -- <csv> <target> <linear|ridge|random_forest> <out.json>
//!
//! Builds the forecast features of a price file and fits a regressor on
//! the next-step difference of the target. The artifact is written as JSON
//! and can be dropped into the models directory.

use anyhow::{bail, Context};
use boursa::dataset::load_path;
use boursa::forecast::{train, ModelKind};
use std::path::Path;
use tracing::info;

const USAGE: &str = "usage: train_model <csv> <target> <linear|ridge|random_forest> <out.json>";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [csv, target, kind, out] = args.as_slice() else {
        bail!(USAGE);
    };
    let Some(kind) = ModelKind::from_str(kind) else {
        bail!("unknown model type '{}'\n{}", kind, USAGE);
    };

    info!("🔄 Training {:?} on {} (target {})", kind, csv, target);
    let loaded = load_path(Path::new(csv)).with_context(|| format!("cannot read {}", csv))?;
    info!(
        "📁 Loaded {} rows, {} columns ({})",
        loaded.frame.n_rows(),
        loaded.frame.column_names().len(),
        loaded.encoding
    );

    let artifact = train(&loaded.frame, target, kind)?;
    artifact.save(Path::new(out))?;

    info!("✅ Training complete");
    info!("Samples: {}", artifact.n_samples.unwrap_or_default());
    info!("Features: {}", artifact.feature_columns.join(", "));
    info!("Artifact: {}", out);
    Ok(())
}
