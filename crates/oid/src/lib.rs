//! A 20-byte content hash identifying an object (blob or commit) in the object database.

use anyhow::Result;

/// An object id as used by the object database: a 20-byte SHA-1 value.
///
/// `Oid` is used both for feature/CRS blob ids and for commit ids. The two are not
/// distinguished at the type level because the object database treats them uniformly
/// (a fixed-width content hash); callers that need to distinguish should do so by
/// context, the way the object database itself does.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Copy, Clone)]
pub struct Oid([u8; 20]);

impl std::fmt::Debug for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Oid({})", self.hex())
    }
}

impl Oid {
    #[inline]
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Oid(bytes)
    }

    #[inline]
    pub fn from_hex(v: &str) -> Result<Self> {
        Ok(Oid(hex::decode(v)?.as_slice().try_into()?))
    }

    #[inline]
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl<'a> From<&'a gix::ObjectId> for Oid {
    #[inline]
    fn from(id: &'a gix::ObjectId) -> Self {
        Oid(id.as_bytes().try_into().expect("oid should be a 20-byte value"))
    }
}

impl From<gix::ObjectId> for Oid {
    #[inline]
    fn from(id: gix::ObjectId) -> Self {
        Oid::from(&id)
    }
}

impl From<Oid> for gix::ObjectId {
    #[inline]
    fn from(oid: Oid) -> Self {
        gix::ObjectId::try_from(oid.as_bytes().as_slice()).expect("Oid is always 20 bytes")
    }
}

// -------------------------------------------------------------------------------------------------
// sql
// -------------------------------------------------------------------------------------------------
mod sql {
    use super::*;
    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for Oid {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(self.as_bytes().as_slice().into())
        }
    }

    impl FromSql for Oid {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            let bytes: [u8; 20] = value
                .as_blob()?
                .try_into()
                .map_err(|e| FromSqlError::Other(Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{e}")))))?;
            Ok(Oid(bytes))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hex_round_trip() {
        let hex = "d08c3dd220eea08d8dfd6d4adb84f9936c541d7a"[..40].to_string();
        let oid = Oid::from_hex(&hex).unwrap();
        assert_eq!(oid.hex(), hex);
    }

    #[test]
    fn rejects_short_hex() {
        assert!(Oid::from_hex("abcd").is_err());
    }
}
