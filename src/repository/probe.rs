use std::{
    fmt::Display,
    fs::File,
    io::{self, Read},
    path::Path,
};

use mockall::automock;
use tracing::trace;

const QCOW2_MAGIC: &[u8; 4] = b"QFI\xfb";
const VMDK_SPARSE_MAGIC: &[u8; 4] = b"KDMV";
const VMDK_DESCRIPTOR_MAGIC: &[u8] = b"# Disk DescriptorFile";
const VDI_SIGNATURE_OFFSET: usize = 64;
const VDI_SIGNATURE: u32 = 0xbeda_107f;
const HEADER_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Qcow2,
    Vdi,
    Vmdk,
    Unknown,
}

impl Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::Qcow2 => write!(f, "QCOW2"),
            ImageFormat::Vdi => write!(f, "VDI"),
            ImageFormat::Vmdk => write!(f, "VMDK"),
            ImageFormat::Unknown => write!(f, "unknown"),
        }
    }
}

/// Detects the container format of a disk image.
#[automock]
pub trait FormatProber {
    fn probe(&self, path: &Path) -> io::Result<ImageFormat>;
}

/// Looks at the magic bytes at the start of the file, never at its extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderProber;

impl FormatProber for HeaderProber {
    fn probe(&self, path: &Path) -> io::Result<ImageFormat> {
        let mut file = File::open(path)?;
        let mut header = Vec::with_capacity(HEADER_LEN);
        file.by_ref()
            .take(HEADER_LEN as u64)
            .read_to_end(&mut header)?;

        let format = detect(&header);
        trace!("probed {} as {}", path.display(), format);
        Ok(format)
    }
}

/// Classify an image from its leading bytes.
pub fn detect(header: &[u8]) -> ImageFormat {
    if header.starts_with(QCOW2_MAGIC) {
        return ImageFormat::Qcow2;
    }

    if header.starts_with(VMDK_SPARSE_MAGIC) || header.starts_with(VMDK_DESCRIPTOR_MAGIC) {
        return ImageFormat::Vmdk;
    }

    let signature = header
        .get(VDI_SIGNATURE_OFFSET..VDI_SIGNATURE_OFFSET + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes);
    if signature == Some(VDI_SIGNATURE) {
        return ImageFormat::Vdi;
    }

    ImageFormat::Unknown
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn qcow2() -> Vec<u8> {
        let mut bytes = QCOW2_MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 3]);
        bytes.resize(1024, 0);
        bytes
    }

    pub fn vdi() -> Vec<u8> {
        let mut bytes = b"<<< Oracle VM VirtualBox Disk Image >>>\n".to_vec();
        bytes.resize(VDI_SIGNATURE_OFFSET, 0);
        bytes.extend_from_slice(&VDI_SIGNATURE.to_le_bytes());
        bytes.resize(1024, 0);
        bytes
    }

    pub fn vmdk() -> Vec<u8> {
        let mut bytes = VMDK_SPARSE_MAGIC.to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.resize(1024, 0);
        bytes
    }
}
