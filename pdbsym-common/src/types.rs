//! Identity types shared between the image indexer and the PDB discovery engine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An error returned for strings that are not valid PDB signatures.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ParseSignatureError;

impl fmt::Display for ParseSignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pdb signature")
    }
}

impl std::error::Error for ParseSignatureError {}

/// The content-addressed key of a PDB file.
///
/// A signature is the uppercase hex rendering of the 16 byte build GUID, followed by the age in
/// uppercase hex without leading zeros. The GUID is printed in its big-endian field layout (4, 2, 2
/// and 8 bytes), which is the layout symbol servers use in their directory structure.
///
/// The signature is a pure function of GUID and age. Two images with the same signature are
/// always served by the same PDB.
///
/// # Example
///
/// ```
/// use pdbsym_common::{PdbSignature, Uuid};
///
/// let guid = Uuid::parse_str("dfb8e43a-f242-3d73-a453-aeb6a777ef75").unwrap();
/// let signature = PdbSignature::from_parts(guid, 0x2a);
/// assert_eq!(signature.to_string(), "DFB8E43AF2423D73A453AEB6A777EF752A");
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PdbSignature {
    guid: Uuid,
    age: u32,
}

impl PdbSignature {
    /// Creates a signature from a GUID in big-endian field layout and an age.
    pub fn from_parts(guid: Uuid, age: u32) -> Self {
        PdbSignature { guid, age }
    }

    /// Creates a signature from a GUID as it is stored on disk in PE and PDB files.
    ///
    /// The on-disk layout stores the first three GUID fields in little endian. They are swapped
    /// into network byte order here.
    pub fn from_guid_le(bytes: [u8; 16], age: u32) -> Self {
        let mut data = bytes;
        data[0..4].reverse(); // guid field 1
        data[4..6].reverse(); // guid field 2
        data[6..8].reverse(); // guid field 3
        Self::from_parts(Uuid::from_bytes(data), age)
    }

    /// The build GUID.
    pub fn guid(&self) -> Uuid {
        self.guid
    }

    /// The age, a small revision counter bumped on incremental links.
    pub fn age(&self) -> u32 {
        self.age
    }
}

impl fmt::Display for PdbSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}{:X}", self.guid.as_simple(), self.age)
    }
}

impl str::FromStr for PdbSignature {
    type Err = ParseSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 32 hex digits of GUID, followed by 1 to 8 hex digits of age.
        if s.len() < 33 || s.len() > 40 || !s.is_ascii() {
            return Err(ParseSignatureError);
        }

        let (guid, age) = s.split_at(32);
        let guid = Uuid::parse_str(guid).map_err(|_| ParseSignatureError)?;
        let age = u32::from_str_radix(age, 16).map_err(|_| ParseSignatureError)?;
        Ok(PdbSignature::from_parts(guid, age))
    }
}

impl Serialize for PdbSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PdbSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        string.parse().map_err(serde::de::Error::custom)
    }
}

/// The identity of a PDB: its file name and signature.
///
/// This is everything needed to address a PDB in a symbol cache or on a symbol server.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PdbIdentity {
    /// The PDB file name the image was built with, without directories. For example `mylib.pdb`.
    pub basename: String,
    /// The content-addressed signature.
    pub signature: PdbSignature,
}

impl PdbIdentity {
    /// Creates a new identity.
    pub fn new(basename: impl Into<String>, signature: PdbSignature) -> Self {
        PdbIdentity {
            basename: basename.into(),
            signature,
        }
    }

    /// The canonical cache key: `<basename>/<signature>/<basename>`.
    ///
    /// ```
    /// use std::path::Path;
    /// use pdbsym_common::{PdbIdentity, PdbSignature};
    ///
    /// let sig: PdbSignature = "ABCDEF0123456789ABCDEF01234567802".parse().unwrap();
    /// let id = PdbIdentity::new("mylib.pdb", sig);
    /// assert_eq!(
    ///     id.cache_key(),
    ///     Path::new("mylib.pdb/ABCDEF0123456789ABCDEF01234567802/mylib.pdb")
    /// );
    /// ```
    pub fn cache_key(&self) -> PathBuf {
        let signature = self.signature.to_string();
        [self.basename.as_str(), signature.as_str(), self.basename.as_str()]
            .iter()
            .collect()
    }

    /// The path of this PDB below a cache root.
    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(self.cache_key())
    }

    /// The relative URL path on a symbol server, always separated by `/`.
    pub fn server_path(&self) -> String {
        format!(
            "{name}/{signature}/{name}",
            name = self.basename,
            signature = self.signature
        )
    }
}

impl fmt::Display for PdbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.basename, self.signature)
    }
}

/// Information an image (`.dll` or `.exe`) declares about itself and its PDB.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageIdentity {
    /// Absolute path to the image on disk.
    pub image_path: PathBuf,
    /// Size of the mapped image in bytes.
    pub image_size: u64,
    /// The PDB this image was linked with.
    pub pdb: PdbIdentity,
}

impl ImageIdentity {
    /// The PDB file name declared by the image.
    pub fn pdb_basename(&self) -> &str {
        &self.pdb.basename
    }

    /// The signature of the PDB declared by the image.
    pub fn pdb_signature(&self) -> PdbSignature {
        self.pdb.signature
    }
}
