// Binary to export TypeScript types
// Run with: cargo run --bin export_types

use ts_rs::TS;

fn main() {
    println!("Exporting TypeScript types...");

    updater::PendingUpdate::export().expect("Failed to export PendingUpdate");
    updater::UpdateStatus::export().expect("Failed to export UpdateStatus");
    updater::ValidationVerdict::export().expect("Failed to export ValidationVerdict");
    updater::RollbackOutcome::export().expect("Failed to export RollbackOutcome");
    updater::FileKind::export().expect("Failed to export FileKind");

    extractor::ArchiveInfo::export().expect("Failed to export ArchiveInfo");
    extractor::ExtractStats::export().expect("Failed to export ExtractStats");

    println!("✓ TypeScript types exported successfully to admin/bindings/");
}
