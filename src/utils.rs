use indicatif::ProgressStyle;

/// 默认进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")
        .expect("progress style cannot be parsed")
}

/// 带速度显示的进度条样式
pub fn pb_style_speed() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {per_sec} {pos}/{len} {msg}")
        .expect("progress style cannot be parsed")
}
