//! End-to-end tests of the host-facing virtual filesystem.

mod common;

use std::sync::Arc;

use archivefs::url::root_for;
use archivefs::{
    ArchiveSession, ArchiveVfs, Config, LocalProvider, MemoryProvider, Severity, VirtualDirEntry,
    VirtualUrl,
};
use common::{
    Collected, Method, RarBuilder, TarBuilder, ZipBuilder, gzip, memory_vfs, seven_zip, split,
};

fn sample_zip() -> Vec<u8> {
    let big: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    ZipBuilder::new()
        .file("readme.txt", b"hello archive", Method::Stored)
        .dir("docs/")
        .file("docs/guide.md", b"# Guide\n\nRead me.\n", Method::Deflate)
        .file("docs/api/index.html", b"<html></html>", Method::Stored)
        .file("data/big.bin", &big, Method::Deflate)
        .finish()
}

/// Read an entry to its end through the host API.
fn read_all(vfs: &ArchiveVfs, path: &str) -> Option<Vec<u8>> {
    let url = VirtualUrl::parse(path).ok()?;
    let mut session = vfs.open(&url)?;
    let mut out = Vec::new();
    let mut buf = [0u8; 777];
    loop {
        let n = vfs.read(Some(&mut session), &mut buf);
        assert!(n >= 0, "read failed for {path}");
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n as usize]);
    }
    assert!(vfs.close(Some(session)));
    Some(out)
}

/// Every file reachable by walking folders from `url`.
fn walk(vfs: &ArchiveVfs, url: &VirtualUrl) -> Vec<VirtualDirEntry> {
    let mut files = Vec::new();
    for entry in vfs.get_directory(url) {
        if entry.is_folder {
            let child = VirtualUrl::parse(&entry.path).unwrap();
            files.extend(walk(vfs, &child));
        } else {
            files.push(entry);
        }
    }
    files
}

#[test]
fn listed_files_read_back_at_their_size() {
    let (_, vfs) = memory_vfs(vec![("/media/sample.zip", sample_zip())]);
    let files = walk(&vfs, &VirtualUrl::new("/media/sample.zip", ""));

    let mut names: Vec<&str> = files.iter().map(|f| f.label.as_str()).collect();
    names.sort();
    assert_eq!(names, ["big.bin", "guide.md", "index.html", "readme.txt"]);

    for file in &files {
        let data = read_all(&vfs, &file.path).unwrap();
        assert_eq!(data.len() as u64, file.size, "{}", file.path);
    }
}

#[test]
fn root_listing_synthesizes_folders() {
    let (_, vfs) = memory_vfs(vec![("/media/sample.zip", sample_zip())]);
    let root = root_for("/media/sample.zip");
    let listed = vfs.get_directory(&VirtualUrl::new("/media/sample.zip", ""));

    let paths: Vec<String> = listed.iter().map(|e| e.path.clone()).collect();
    assert_eq!(
        paths,
        [
            format!("{root}readme.txt"),
            format!("{root}docs/"),
            format!("{root}data/"),
        ]
    );
    assert_eq!(listed[0].mtime, common::MTIME);

    let docs = vfs.get_directory(&VirtualUrl::new("/media/sample.zip", "docs/"));
    let labels: Vec<&str> = docs.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, ["guide.md", "api"]);
}

#[test]
fn contains_files_flattens_every_leaf() {
    let (_, vfs) = memory_vfs(vec![(
        "/m/deep.zip",
        ZipBuilder::new()
            .file("a.txt", b"1", Method::Stored)
            .file("x/b.txt", b"22", Method::Deflate)
            .file("x/y/c.txt", b"333", Method::Stored)
            .file("x/y/z/d.txt", b"4444", Method::DeflateDescriptor)
            .finish(),
    )]);

    let probe = vfs.contains_files("/m/deep.zip").unwrap();
    assert_eq!(probe.root, "archive://%2Fm%2Fdeep.zip/");
    assert_eq!(probe.entries.len(), 4);
    assert_eq!(probe.entries[3].path, format!("{}x/y/z/d.txt", probe.root));
}

#[test]
fn unknown_entries_leave_nothing_open() {
    let (provider, vfs) = memory_vfs(vec![("/m/a.zip", sample_zip())]);
    let url = VirtualUrl::new("/m/a.zip", "no/such/file");

    for _ in 0..5 {
        assert!(vfs.open(&url).is_none());
        assert_eq!(provider.live_streams(), 0);
    }
    assert_eq!(provider.total_opens(), 5);

    assert!(vfs.open(&VirtualUrl::new("/m/missing.zip", "x")).is_none());
    assert!(vfs.open(&VirtualUrl::new("/m/a.zip", "docs")).is_none());
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn null_handles_report_sentinels() {
    let (_, vfs) = memory_vfs(vec![]);
    let mut buf = [0u8; 4];
    assert_eq!(vfs.read(None, &mut buf), 0);
    assert_eq!(vfs.seek(None, 0, 0), -1);
    assert_eq!(vfs.get_length(None), -1);
    assert_eq!(vfs.get_position(None), -1);
    assert!(vfs.close(None));
}

/// Read exactly `n` bytes from the current position.
fn read_exact(vfs: &ArchiveVfs, session: &mut ArchiveSession, n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let got = vfs.read(Some(session), &mut out[filled..]);
        assert!(got > 0, "short read");
        filled += got as usize;
    }
    out
}

#[test]
fn seek_length_and_position() {
    let (provider, vfs) = memory_vfs(vec![("/m/a.zip", sample_zip())]);
    let url = VirtualUrl::new("/m/a.zip", "data/big.bin");
    let mut session = vfs.open(&url).unwrap();

    assert_eq!(vfs.get_length(Some(&session)), 50_000);
    assert_eq!(vfs.get_position(Some(&session)), 0);

    assert_eq!(vfs.seek(Some(&mut session), 40_000, 0), 40_000);
    let expected: Vec<u8> = (40_000..40_003u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(read_exact(&vfs, &mut session, 3), expected);
    assert_eq!(vfs.get_position(Some(&session)), 40_003);

    assert_eq!(vfs.seek(Some(&mut session), -10, 2), 49_990);
    assert_eq!(vfs.seek(Some(&mut session), 5, 1), 49_995);
    assert_eq!(vfs.seek(Some(&mut session), 10, 0), 10);
    assert_eq!(read_exact(&vfs, &mut session, 3), [10u8, 11, 12]);

    assert_eq!(vfs.seek(Some(&mut session), 60_000, 0), -1);
    assert_eq!(vfs.get_position(Some(&session)), -1);
    assert_eq!(vfs.seek(Some(&mut session), 1, 7), -1);

    assert!(vfs.close(Some(session)));
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn exists_matches_exact_paths() {
    let (_, vfs) = memory_vfs(vec![("/m/a.zip", sample_zip())]);
    assert!(vfs.exists(&VirtualUrl::new("/m/a.zip", "docs/guide.md")));
    assert!(vfs.exists(&VirtualUrl::new("/m/a.zip", "docs/")));
    assert!(!vfs.exists(&VirtualUrl::new("/m/a.zip", "docs/guide")));
    assert!(!vfs.exists(&VirtualUrl::new("/m/b.zip", "docs/guide.md")));
}

#[test]
fn split_part_volumes_read_as_one_archive() {
    let zip = sample_zip();
    let parts = split(&zip, 3);
    let (provider, vfs) = memory_vfs(vec![
        ("/rips/show.part1.rar", parts[0].clone()),
        ("/rips/show.part2.rar", parts[1].clone()),
        ("/rips/show.part3.rar", parts[2].clone()),
    ]);

    let probe = vfs.contains_files("/rips/show.part1.rar").unwrap();
    assert_eq!(probe.entries.len(), 5);
    assert!(vfs.contains_files("/rips/show.part2.rar").is_none());

    let big = read_all(&vfs, &format!("{}data/big.bin", probe.root)).unwrap();
    assert_eq!(big.len(), 50_000);
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn legacy_volume_set_starts_with_the_rar_file() {
    let zip = sample_zip();
    let parts = split(&zip, 3);
    let (_, vfs) = memory_vfs(vec![
        ("/rips/show.rar", parts[0].clone()),
        ("/rips/show.r00", parts[1].clone()),
        ("/rips/show.r01", parts[2].clone()),
    ]);

    let url = VirtualUrl::new("/rips/show.rar", "data/big.bin");
    let session = vfs.open(&url).unwrap();
    assert_eq!(
        session.volumes().paths(),
        ["/rips/show.rar", "/rips/show.r00", "/rips/show.r01"]
    );
    vfs.close(Some(session));

    assert!(vfs.contains_files("/rips/show.r00").is_none());
    assert_eq!(read_all(&vfs, &url.to_string()).unwrap().len(), 50_000);
}

#[test]
fn gzipped_tar_is_browsable() {
    let tar = TarBuilder::new()
        .dir("photos/")
        .file("photos/cat.jpg", &[7u8; 1300])
        .file("notes.txt", b"tar notes")
        .finish();
    let (_, vfs) = memory_vfs(vec![("/m/backup.tar.gz", gzip(&tar))]);

    let listed = vfs.get_directory(&VirtualUrl::new("/m/backup.tar.gz", ""));
    let labels: Vec<&str> = listed.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, ["photos", "notes.txt"]);

    let root = root_for("/m/backup.tar.gz");
    assert_eq!(read_all(&vfs, &format!("{root}notes.txt")).unwrap(), b"tar notes");
    assert_eq!(read_all(&vfs, &format!("{root}photos/cat.jpg")).unwrap().len(), 1300);
}

#[test]
fn not_an_archive() {
    let (_, vfs) = memory_vfs(vec![("/m/plain.txt", b"just text".to_vec())]);
    assert!(vfs.contains_files("/m/plain.txt").is_none());
    assert!(vfs.get_directory(&VirtualUrl::new("/m/plain.txt", "")).is_empty());
}

#[test]
fn truncated_archive_lists_what_it_can() {
    let zip = sample_zip();
    // Cut inside the file name of the last local header.
    let name = b"data/big.bin";
    let at = zip.windows(name.len()).position(|w| w == name).unwrap();
    let mut provider = MemoryProvider::new();
    provider.insert("/m/cut.zip", zip[..at + 4].to_vec());
    let notes = Collected::default();
    let vfs = ArchiveVfs::new(Arc::new(provider), Config::default())
        .with_notifier(Box::new(notes.clone()));

    let probe = vfs.contains_files("/m/cut.zip").unwrap();
    let labels: Vec<&str> = probe.entries.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(
        labels,
        ["readme.txt", "docs/", "docs/guide.md", "docs/api/index.html"]
    );
    assert_eq!(
        notes.take(),
        [(Severity::Fatal, "The archive is truncated".to_string())]
    );
}

#[test]
fn stored_descriptor_entry_keeps_the_rest_listed() {
    let notes = Collected::default();
    let mut provider = MemoryProvider::new();
    provider.insert(
        "/m/streamed.zip",
        ZipBuilder::new()
            .file("piped.log", b"line one\nline two\n", Method::StoredDescriptor)
            .file("later.txt", b"after the pipe", Method::Deflate)
            .finish(),
    );
    let vfs = ArchiveVfs::new(Arc::new(provider), Config::default())
        .with_notifier(Box::new(notes.clone()));

    let probe = vfs.contains_files("/m/streamed.zip").unwrap();
    let listed: Vec<(&str, u64)> = probe
        .entries
        .iter()
        .map(|e| (e.label.as_str(), e.size))
        .collect();
    assert_eq!(listed, [("piped.log", 18), ("later.txt", 14)]);
    assert!(notes.take().is_empty());

    let root = &probe.root;
    assert_eq!(
        read_all(&vfs, &format!("{root}piped.log")).unwrap(),
        b"line one\nline two\n"
    );
    assert_eq!(read_all(&vfs, &format!("{root}later.txt")).unwrap(), b"after the pipe");
}

#[test]
fn oversized_tar_name_record_is_rejected() {
    let mut header = vec![0u8; 512];
    header[..13].copy_from_slice(b"././@LongLink");
    header[100..108].copy_from_slice(b"0000644\0");
    header[124] = 0x80;
    header[128] = 0x40;
    header[136..148].copy_from_slice(b"00000000000\0");
    header[156] = b'L';
    header[257..263].copy_from_slice(b"ustar\0");
    header[148..156].copy_from_slice(b"        ");
    let sum: u32 = header.iter().map(|&b| b as u32).sum();
    header[148..156].copy_from_slice(format!("{:06o}\0 ", sum).as_bytes());
    header.resize(1536, 0);

    let (provider, vfs) = memory_vfs(vec![("/m/evil.tar", header)]);
    assert!(vfs.contains_files("/m/evil.tar").is_none());
    assert_eq!(provider.live_streams(), 0);
}

fn sample_rar() -> RarBuilder {
    let big: Vec<u8> = (0..20_000u32).map(|i| (i % 241) as u8).collect();
    RarBuilder::new()
        .file("info.txt", b"split rar set")
        .file("media/clip.bin", &big)
}

#[test]
fn split_rar_set_from_memory_is_spooled() {
    let volumes = sample_rar().volumes(3);
    let (provider, vfs) = memory_vfs(vec![
        ("/rips/movie.part1.rar", volumes[0].clone()),
        ("/rips/movie.part2.rar", volumes[1].clone()),
        ("/rips/movie.part3.rar", volumes[2].clone()),
    ]);

    let probe = vfs.contains_files("/rips/movie.part1.rar").unwrap();
    let listed: Vec<(&str, u64)> = probe
        .entries
        .iter()
        .map(|e| (e.label.as_str(), e.size))
        .collect();
    assert_eq!(listed, [("info.txt", 13), ("media/clip.bin", 20_000)]);
    assert!(vfs.contains_files("/rips/movie.part2.rar").is_none());

    let clip = read_all(&vfs, &format!("{}media/clip.bin", probe.root)).unwrap();
    let expected: Vec<u8> = (0..20_000u32).map(|i| (i % 241) as u8).collect();
    assert_eq!(clip, expected);
    assert_eq!(provider.live_streams(), 0);
}

#[test]
fn split_rar_set_on_disk_is_read_in_place() {
    let dir = tempfile::tempdir().unwrap();
    for (i, volume) in sample_rar().volumes(2).iter().enumerate() {
        std::fs::write(dir.path().join(format!("set.part{}.rar", i + 1)), volume).unwrap();
    }
    let first = dir.path().join("set.part1.rar").to_string_lossy().into_owned();

    let vfs = ArchiveVfs::new(Arc::new(LocalProvider), Config::default());
    let url = VirtualUrl::new(&first, "media/clip.bin");
    let mut session = vfs.open(&url).unwrap();
    assert_eq!(session.volumes().len(), 2);
    assert_eq!(vfs.get_length(Some(&session)), 20_000);
    assert_eq!(vfs.seek(Some(&mut session), 19_998, 0), 19_998);
    let expected: Vec<u8> = (19_998..20_000u32).map(|i| (i % 241) as u8).collect();
    assert_eq!(read_exact(&vfs, &mut session, 2), expected);
    assert!(vfs.close(Some(session)));

    assert_eq!(
        read_all(&vfs, &format!("{}info.txt", root_for(&first))).unwrap(),
        b"split rar set"
    );
}

#[test]
fn seven_zip_is_browsable() {
    let (_, vfs) = memory_vfs(vec![(
        "/m/pack.7z",
        seven_zip(&[("src/main.rs", &b"fn main() {}"[..]), ("README", &b"7z"[..])]),
    )]);

    let mut labels: Vec<String> = vfs
        .get_directory(&VirtualUrl::new("/m/pack.7z", ""))
        .into_iter()
        .map(|e| e.label)
        .collect();
    labels.sort();
    assert_eq!(labels, ["README", "src"]);

    let root = root_for("/m/pack.7z");
    assert_eq!(read_all(&vfs, &format!("{root}src/main.rs")).unwrap(), b"fn main() {}");
}

#[test]
fn local_files_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.zip");
    std::fs::write(&path, sample_zip()).unwrap();
    let path = path.to_string_lossy().into_owned();

    let vfs = ArchiveVfs::new(Arc::new(LocalProvider), Config::default());
    let probe = vfs.contains_files(&path).unwrap();
    assert_eq!(probe.root, root_for(&path));
    assert_eq!(
        read_all(&vfs, &format!("{}readme.txt", probe.root)).unwrap(),
        b"hello archive"
    );
}
