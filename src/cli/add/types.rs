use crate::imdb::EncodedFingerprint;

pub struct FileData {
    pub path: String,
    pub data: Vec<u8>,
}

pub struct EncodedFile {
    pub path: String,
    pub encoded: EncodedFingerprint,
}
