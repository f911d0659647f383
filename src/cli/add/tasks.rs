use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressIterator};
use log::info;
use rayon::prelude::*;
use regex::Regex;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::{JoinHandle, spawn_blocking};
use tokio_tar::Archive;
use walkdir::WalkDir;

use super::types::*;
use crate::ImprintDB;
use crate::utils::{pb_style, pb_style_speed};

pub fn task_scan(
    path: PathBuf,
    pb: ProgressBar,
    regex_suf: Regex,
) -> (JoinHandle<()>, Receiver<FileData>) {
    let (tx, rx) = channel(num_cpus::get());
    let t = tokio::spawn(async move {
        // NOTE: 这里刻意不使用 `?` 而是 unwrap，这是为了确保出错时正常崩溃
        // 如果上抛的话，上层就需要正确打印错误，太过麻烦，不如直接 panic
        if path.is_file() {
            scan_tar(path, tx, regex_suf, pb).await.unwrap();
        } else {
            scan_directory(path, tx, regex_suf, pb).await.unwrap();
        }
    });
    (t, rx)
}

pub fn task_filter(
    mut lrx: Receiver<FileData>,
    pb: ProgressBar,
    db: Arc<ImprintDB>,
    overwrite: bool,
    replace: Option<(Regex, String)>,
) -> (JoinHandle<()>, Receiver<FileData>) {
    let (tx, rx) = channel(num_cpus::get());
    let t = tokio::spawn(async move {
        while let Some(mut data) = lrx.recv().await {
            if let Some((re, replace)) = &replace {
                data.path = re.replace(&data.path, replace.as_str()).into_owned();
            }
            let exists = db.contains(&data.path).await.unwrap();
            if exists && !overwrite {
                pb.set_message(format!("跳过已存在指纹: {}", data.path));
                pb.inc(1);
            } else {
                tx.send(data).await.unwrap();
            }
        }
    });
    (t, rx)
}

pub fn task_encode(
    mut lrx: Receiver<FileData>,
    pb: ProgressBar,
    db: Arc<ImprintDB>,
) -> (JoinHandle<()>, Receiver<EncodedFile>) {
    let (tx, rx) = channel(num_cpus::get());
    let t = spawn_blocking(move || {
        let mut buffer = vec![];
        let tx = &tx;
        let pb = &pb;
        let db = &db;
        // NOTE: 这里一次读取 cpu * 10 组数据，然后等待计算完成后再读取下一批
        // 这样可以避免同时积压太多文件内容，导致内存占用过高
        while lrx.blocking_recv_many(&mut buffer, num_cpus::get() * 10) != 0 {
            buffer.par_drain(..).for_each(|data| match db.encode(&data.data) {
                Ok(encoded) => {
                    tx.blocking_send(EncodedFile { path: data.path, encoded }).unwrap();
                }
                Err(e) => pb.println(format!("计算嵌入失败: {}: {}", data.path, e)),
            });
        }
    });
    (t, rx)
}

pub fn task_add(
    mut lrx: Receiver<EncodedFile>,
    pb: ProgressBar,
    db: Arc<ImprintDB>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = lrx.recv().await {
            db.insert(&data.path, &data.encoded).await.unwrap();
            pb.set_message(data.path);
            pb.inc(1);
        }
    })
}

/// 两阶段添加：只登记指纹，不计算嵌入
pub fn task_register(
    mut lrx: Receiver<FileData>,
    pb: ProgressBar,
    db: Arc<ImprintDB>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = lrx.recv().await {
            db.add_unembedded(&data.path, &data.data).await.unwrap();
            pb.set_message(data.path);
            pb.inc(1);
        }
    })
}

async fn scan_directory(
    path: PathBuf,
    tx: Sender<FileData>,
    regex_suf: Regex,
    pb: ProgressBar,
) -> Result<()> {
    info!("开始扫描目录: {}", path.display());
    let pb2 = ProgressBar::no_length().with_style(pb_style());
    let entries = WalkDir::new(path)
        .into_iter()
        .progress_with(pb2)
        .filter_map(|entry| {
            entry.ok().and_then(|entry| {
                let path = entry.path();
                if path.is_file() {
                    if let Some(ext) = path.extension() {
                        if regex_suf.is_match(&ext.to_string_lossy()) {
                            return Some(path.to_string_lossy().to_string());
                        }
                    }
                }
                None
            })
        })
        .collect::<Vec<_>>();
    info!("扫描完成，共 {} 个文件", entries.len());

    pb.set_length(entries.len() as u64);

    futures::stream::iter(entries)
        .for_each_concurrent(32, |entry| async {
            if let Ok(data) = tokio::fs::read(&entry).await {
                tx.send(FileData { path: entry, data }).await.unwrap();
            }
        })
        .await;

    Ok(())
}

async fn scan_tar(
    path: PathBuf,
    tx: Sender<FileData>,
    re_suf: Regex,
    pb: ProgressBar,
) -> Result<()> {
    let file = File::open(path).await?;
    let mut archive = Archive::new(file);
    let mut entries = archive.entries()?;

    pb.set_style(pb_style_speed());

    // NOTE: tar 的 entries 必须按顺序读取，不能乱序并发
    while let Some(entry) = entries.next().await {
        let mut entry = entry?;
        let path = entry.path()?;
        // 跳过不符合条件的文件
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(ext) = path.extension() else {
            continue;
        };
        if !re_suf.is_match(&ext.to_string_lossy()) {
            continue;
        }

        let path = path.to_string_lossy().to_string();

        let mut data = Vec::with_capacity(entry.header().size()? as usize);
        entry.read_to_end(&mut data).await?;

        tx.send(FileData { path, data }).await.unwrap();
    }
    Ok(())
}
