use unimount_storage::FileObject;

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// One `ls` line: kind, size, modification time and name.
pub fn format_row(obj: &FileObject) -> String {
    let kind = if obj.is_dir { "d" } else { "-" };
    let size = if obj.is_dir {
        "-".to_string()
    } else {
        obj.size.to_string()
    };
    format!(
        "{} {:>12} {} {}",
        kind,
        size,
        obj.modified.format("%Y-%m-%d %H:%M"),
        truncate_string(&obj.name, 64)
    )
}

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,unimount_storage=debug")),
        )
        .init();
}
