// 上传前的素材校验：扩展名与大小不符直接拒绝，不浪费一次上传请求。
use crate::wecom::error::{WecomError, WecomResult};
use std::path::Path;

const MIN_MEDIA_BYTES: u64 = 5;
const MAX_SMALL_MEDIA_BYTES: u64 = 2 * 1024 * 1024;
const MAX_LARGE_MEDIA_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Voice,
    Video,
    File,
}

impl MediaKind {
    pub fn parse(raw: &str) -> WecomResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "voice" => Ok(Self::Voice),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            other => Err(WecomError::UnsupportedType(format!(
                "{other} (expected image, voice, video or file)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Voice => "voice",
            Self::Video => "video",
            Self::File => "file",
        }
    }

    fn allowed_extensions(self) -> Option<&'static [&'static str]> {
        match self {
            Self::Image => Some(&["jpg", "png"]),
            Self::Voice => Some(&["amr"]),
            Self::Video => Some(&["mp4"]),
            Self::File => None,
        }
    }

    fn max_bytes(self) -> u64 {
        match self {
            Self::Image | Self::Voice => MAX_SMALL_MEDIA_BYTES,
            Self::Video | Self::File => MAX_LARGE_MEDIA_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub fn check(media_type: &str, path: impl AsRef<Path>) -> WecomResult<MediaFile> {
    check_kind(MediaKind::parse(media_type)?, path)
}

pub fn check_kind(kind: MediaKind, path: impl AsRef<Path>) -> WecomResult<MediaFile> {
    let path = path.as_ref();
    let size_hint = size_range_label(kind);
    let metadata = std::fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .ok_or_else(|| {
            WecomError::Validation(format!(
                "{} 文件不存在或不是普通文件: {}",
                kind.as_str(),
                path.display()
            ))
        })?;

    if let Some(allowed) = kind.allowed_extensions() {
        let extension = path
            .extension()
            .and_then(|value| value.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !allowed.contains(&extension.as_str()) {
            return Err(WecomError::Validation(format!(
                "{} 文件类型不合法: {}，仅支持 {}（{size_hint}）",
                kind.as_str(),
                path.display(),
                allowed.join("/")
            )));
        }
    }

    let size = metadata.len();
    if size < MIN_MEDIA_BYTES || size > kind.max_bytes() {
        return Err(WecomError::Validation(format!(
            "{} 文件大小不合法: {} 为 {size}B，要求 {size_hint}",
            kind.as_str(),
            path.display()
        )));
    }

    let bytes = std::fs::read(path).map_err(|err| {
        WecomError::Validation(format!("读取文件失败: {}: {err}", path.display()))
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| kind.as_str().to_string());
    Ok(MediaFile { file_name, bytes })
}

fn size_range_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image | MediaKind::Voice => "5B~2M",
        MediaKind::Video | MediaKind::File => "5B~10M",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![7u8; size]).expect("write fixture");
        path
    }

    #[test]
    fn image_size_bounds_are_inclusive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ok = write_file(&dir, "five.png", 5);
        let media = check("image", &ok).expect("5 bytes passes");
        assert_eq!(media.file_name, "five.png");
        assert_eq!(media.bytes.len(), 5);

        let max = write_file(&dir, "max.jpg", 2 * 1024 * 1024);
        assert!(check("image", &max).is_ok());

        let small = write_file(&dir, "four.png", 4);
        assert!(matches!(check("image", &small), Err(WecomError::Validation(_))));

        let large = write_file(&dir, "large.png", 2 * 1024 * 1024 + 1);
        assert!(matches!(check("image", &large), Err(WecomError::Validation(_))));
    }

    #[test]
    fn image_extension_is_case_insensitive_and_gif_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let upper = write_file(&dir, "photo.PNG", 64);
        assert!(check("image", &upper).is_ok());
        let gif = write_file(&dir, "anim.gif", 64);
        let err = check("image", &gif).expect_err("gif rejected");
        assert!(matches!(err, WecomError::Validation(ref reason) if reason.contains("jpg/png")));
    }

    #[test]
    fn voice_and_video_have_own_constraints() {
        let dir = tempfile::tempdir().expect("tempdir");
        let voice = write_file(&dir, "hello.AMR", 100);
        assert!(check("voice", &voice).is_ok());
        let wrong_voice = write_file(&dir, "hello.mp3", 100);
        assert!(check("voice", &wrong_voice).is_err());

        let video = write_file(&dir, "clip.mp4", 3 * 1024 * 1024);
        assert!(check("video", &video).is_ok());
        let too_big = write_file(&dir, "long.mp4", 10 * 1024 * 1024 + 1);
        assert!(check("video", &too_big).is_err());
    }

    #[test]
    fn generic_file_requires_existence_and_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv = write_file(&dir, "record.csv", 5);
        assert!(check("file", &csv).is_ok());
        let missing = dir.path().join("missing.csv");
        assert!(matches!(check("file", &missing), Err(WecomError::Validation(_))));
        assert!(check("file", dir.path()).is_err());
    }

    #[test]
    fn unknown_media_type_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "a.png", 10);
        assert!(matches!(
            check("sticker", &path),
            Err(WecomError::UnsupportedType(_))
        ));
    }
}
