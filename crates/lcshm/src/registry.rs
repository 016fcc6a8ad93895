//! Connection registry: the fixed-capacity table of listening connection
//! names at the tail of the region.
//!
//! Table layout: a little-endian count word, then `count` packed
//! variable-length slots. Each slot is the connection name, a NUL, the
//! version digit, and the sandbox digit. Slots are kept contiguous from
//! the start of the table; removal compacts the tail forward so
//! registration order is preserved.
//!
//! All operations require the channel lock. Returned connections are
//! owned copies: slot contents can be rewritten by any other process the
//! moment the lock is released.

use std::str;

use crate::connection::{connection_name_valid, Connection, Sandbox, Version};
use crate::errors::{LcshmError, Result};
use crate::layout;

const COUNT_OFFSET: usize = layout::CONNECTIONS_OFFSET;
const SLOTS_OFFSET: usize = layout::CONNECTIONS_OFFSET + 4;
const TABLE_END: usize = layout::CONNECTIONS_OFFSET + layout::CONNECTIONS_SIZE;

/// A parsed slot with its byte range, for in-place compaction.
struct Slot {
    start: usize,
    end: usize,
    connection: Connection,
}

fn walk(region: &[u8]) -> Result<Vec<Slot>> {
    let count = layout::read_u32(region, COUNT_OFFSET) as usize;
    if count > layout::CONNECTIONS_MAX_COUNT {
        return Err(LcshmError::Corrupt("connection count out of range"));
    }

    let mut slots = Vec::with_capacity(count);
    let mut pos = SLOTS_OFFSET;
    for _ in 0..count {
        let nul = region[pos..TABLE_END]
            .iter()
            .position(|&b| b == 0)
            .ok_or(LcshmError::Corrupt("unterminated connection name"))?;
        let name_end = pos + nul;
        if name_end + 3 > TABLE_END {
            return Err(LcshmError::Corrupt("truncated connection slot"));
        }
        let name = str::from_utf8(&region[pos..name_end])
            .map_err(|_| LcshmError::Corrupt("connection name is not UTF-8"))?
            .to_owned();
        let version = Version::from_digit(region[name_end + 1])
            .ok_or(LcshmError::Corrupt("unknown connection version digit"))?;
        let sandbox = Sandbox::from_digit(region[name_end + 2])
            .ok_or(LcshmError::Corrupt("unknown connection sandbox digit"))?;

        let end = name_end + 3;
        slots.push(Slot {
            start: pos,
            end,
            connection: Connection {
                name,
                version,
                sandbox,
            },
        });
        pos = end;
    }
    Ok(slots)
}

/// All registered connections, in registration order.
///
/// Caller must hold the channel lock.
pub fn list(region: &[u8]) -> Result<Vec<Connection>> {
    debug_assert_eq!(region.len(), layout::SIZE);
    Ok(walk(region)?.into_iter().map(|s| s.connection).collect())
}

/// Register a connection.
///
/// Caller must hold the channel lock. The name must pass the validity
/// predicate, must not already be registered, and the sandbox must not be
/// `Application`. Fails with [`LcshmError::Full`] at capacity; failures
/// leave the table unchanged.
pub fn add(region: &mut [u8], connection: &Connection) -> Result<()> {
    debug_assert_eq!(region.len(), layout::SIZE);

    if !connection_name_valid(&connection.name) {
        return Err(LcshmError::InvalidName);
    }
    if connection.sandbox == Sandbox::Application {
        return Err(LcshmError::InvalidArgument(
            "application sandbox is never registered",
        ));
    }

    let slots = walk(region)?;
    if slots.iter().any(|s| s.connection.name == connection.name) {
        return Err(LcshmError::InvalidArgument("name already registered"));
    }
    if slots.len() == layout::CONNECTIONS_MAX_COUNT {
        return Err(LcshmError::Full);
    }

    let insert = slots.last().map_or(SLOTS_OFFSET, |s| s.end);
    let name = connection.name.as_bytes();
    // The name budget guarantees eight maximal slots fit, so this can
    // only trip on a table written by a foreign, incompatible producer.
    if insert + name.len() + 3 > TABLE_END {
        return Err(LcshmError::Full);
    }

    region[insert..insert + name.len()].copy_from_slice(name);
    region[insert + name.len()] = 0;
    region[insert + name.len() + 1] = connection.version.digit();
    region[insert + name.len() + 2] = connection.sandbox.digit();
    layout::write_u32(region, COUNT_OFFSET, (slots.len() + 1) as u32);
    Ok(())
}

/// Unregister the first slot matching `connection` on name, version and
/// sandbox, compacting later slots forward.
///
/// Caller must hold the channel lock.
pub fn remove(region: &mut [u8], connection: &Connection) -> Result<()> {
    debug_assert_eq!(region.len(), layout::SIZE);

    let slots = walk(region)?;
    let index = slots
        .iter()
        .position(|s| s.connection == *connection)
        .ok_or(LcshmError::NotFound)?;

    let removed = &slots[index];
    let tail_end = slots.last().map_or(removed.end, |s| s.end);
    let (start, end) = (removed.start, removed.end);

    region.copy_within(end..tail_end, start);
    let new_end = tail_end - (end - start);
    region[new_end..tail_end].fill(0);
    layout::write_u32(region, COUNT_OFFSET, (slots.len() - 1) as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_region() -> Vec<u8> {
        vec![0u8; layout::SIZE]
    }

    fn conn(name: &str) -> Connection {
        Connection::new(name, Version::V1, Sandbox::Remote)
    }

    #[test]
    fn test_empty_table_lists_nothing() {
        let region = empty_region();
        assert!(list(&region).unwrap().is_empty());
    }

    #[test]
    fn test_add_then_list_preserves_order_and_attributes() {
        let mut region = empty_region();
        let a = Connection::new("A", Version::V1, Sandbox::Remote);
        let b = Connection::new("B", Version::V2, Sandbox::LocalTrusted);
        add(&mut region, &a).unwrap();
        add(&mut region, &b).unwrap();

        assert_eq!(list(&region).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut region = empty_region();
        let a = Connection::new("A", Version::V1, Sandbox::Remote);
        add(&mut region, &a).unwrap();
        assert!(matches!(
            add(&mut region, &a),
            Err(LcshmError::InvalidArgument(_))
        ));
        // Same name under different attributes is still a duplicate.
        let a2 = Connection::new("A", Version::V3, Sandbox::LocalTrusted);
        assert!(add(&mut region, &a2).is_err());

        assert_eq!(list(&region).unwrap().len(), 1);
    }

    #[test]
    fn test_capacity_is_eight() {
        let mut region = empty_region();
        for i in 1..=8 {
            add(&mut region, &conn(&format!("c{i}"))).unwrap();
        }
        assert!(matches!(
            add(&mut region, &conn("c9")),
            Err(LcshmError::Full)
        ));

        let names: Vec<_> = list(&region)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["c1", "c2", "c3", "c4", "c5", "c6", "c7", "c8"]);
    }

    #[test]
    fn test_remove_compacts_and_preserves_order() {
        let mut region = empty_region();
        for name in ["a", "b", "c", "d"] {
            add(&mut region, &conn(name)).unwrap();
        }

        remove(&mut region, &conn("b")).unwrap();

        let names: Vec<_> = list(&region)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["a", "c", "d"]);
        assert_eq!(layout::read_u32(&region, super::COUNT_OFFSET), 3);
    }

    #[test]
    fn test_remove_frees_a_slot() {
        let mut region = empty_region();
        for i in 1..=8 {
            add(&mut region, &conn(&format!("c{i}"))).unwrap();
        }
        assert!(add(&mut region, &conn("c9")).is_err());

        remove(&mut region, &conn("c4")).unwrap();
        add(&mut region, &conn("c9")).unwrap();

        let names: Vec<_> = list(&region)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["c1", "c2", "c3", "c5", "c6", "c7", "c8", "c9"]);
    }

    #[test]
    fn test_remove_matches_all_attributes() {
        let mut region = empty_region();
        add(
            &mut region,
            &Connection::new("A", Version::V2, Sandbox::Remote),
        )
        .unwrap();

        // Wrong version or sandbox: no match.
        assert!(matches!(
            remove(
                &mut region,
                &Connection::new("A", Version::V3, Sandbox::Remote)
            ),
            Err(LcshmError::NotFound)
        ));
        assert!(matches!(
            remove(
                &mut region,
                &Connection::new("A", Version::V2, Sandbox::LocalTrusted)
            ),
            Err(LcshmError::NotFound)
        ));

        remove(
            &mut region,
            &Connection::new("A", Version::V2, Sandbox::Remote),
        )
        .unwrap();
        assert!(list(&region).unwrap().is_empty());
    }

    #[test]
    fn test_remove_last_entry_zeroes_its_slot() {
        let mut region = empty_region();
        add(&mut region, &conn("only")).unwrap();
        remove(&mut region, &conn("only")).unwrap();

        assert!(list(&region).unwrap().is_empty());
        assert!(region[SLOTS_OFFSET..SLOTS_OFFSET + 8].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        let mut region = empty_region();
        assert!(matches!(
            add(&mut region, &conn("")),
            Err(LcshmError::InvalidName)
        ));
        assert!(matches!(
            add(&mut region, &conn("bad:form")),
            Err(LcshmError::InvalidName)
        ));
        // The qualified digits-colon form is allowed.
        add(&mut region, &conn("42:name")).unwrap();
    }

    #[test]
    fn test_application_sandbox_is_rejected() {
        let mut region = empty_region();
        let app = Connection::new("app", Version::V4, Sandbox::Application);
        assert!(matches!(
            add(&mut region, &app),
            Err(LcshmError::InvalidArgument(_))
        ));
        assert!(list(&region).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_count_is_reported() {
        let mut region = empty_region();
        layout::write_u32(&mut region, COUNT_OFFSET, 9);
        assert!(matches!(list(&region), Err(LcshmError::Corrupt(_))));
    }
}
