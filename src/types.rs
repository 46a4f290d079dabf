/// Knowledge-base item identifier (source side of a pair).
/// Examples: `Q42`, `Q1299`
pub type Qid = String;
/// Target-catalog record identifier (target side of a pair).
/// Examples: `264375` (Discogs artist), `0c751690-c784-4a4f-b1e4-c1de27d47581` (MusicBrainz)
pub type Tid = String;
/// Knowledge-base property identifier.
/// Examples: `P1953`, `P434`, `P973`
pub type Pid = String;
/// Link (URL) attached to an identifier, used by the reconciliation checker.
/// Example: `https://www.discogs.com/artist/264375`
pub type LinkUrl = String;
/// External identifier extracted from a link via a formatter pattern.
/// Example: `nm0000206`
pub type ExternalId = String;
/// Name of a feature-matrix column.
/// Examples: `name_similarity`, `missing_0`
pub type ColumnName = String;
/// Components used to build artifact-cache fingerprints.
/// Example: `discogs|musician|classification|chunk=1000`
pub type HashPart = String;
