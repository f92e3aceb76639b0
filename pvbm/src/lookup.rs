//! Lookup-table engine: plain (exact), ternary (mask + position tie-break),
//! and longest-prefix-match tables, each available as a static table built
//! once from a fixed entry list or a dynamic table grown and shrunk at
//! runtime by id.
//!
//! A table always carries a default value — there is no way to construct
//! one without supplying it — so a lookup that matches nothing still
//! returns a usable result rather than an `Option`. Callers that want
//! function-dispatch semantics (the original's `SFTABLE`/`DFTABLE`) use
//! [`LookupTable::dispatch`]; callers that want the matched value back
//! directly (`STABLE`/`DTABLE`) use [`LookupTable::lookup`]. Both read the
//! same underlying entries — the dispatch/value distinction is just which
//! of the two methods a caller reaches for.
//!
//! Key extraction from a caller's native argument type is left to the
//! caller via the [`KeyProjection`] trait, mirroring the `make_key`
//! projection functions built from per-table argument structs.

use crate::error::{Error, Result};

/// Projects a caller's argument type down to the byte key a table matches
/// against. Implement this once per argument shape a table is keyed on.
pub trait KeyProjection<Args: ?Sized> {
    fn project(args: &Args) -> Vec<u8>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Plain,
    Ternary,
    Lpm,
}

struct Entry<V> {
    id: u32,
    key: Vec<u8>,
    mask: Vec<u8>,
    position: u32,
    prefix_len: u32,
    value: V,
}

/// A single lookup table. `dynamic` tables accept `add_*`/`del_*`/
/// `change_*` calls after construction; static tables are built once from
/// a fixed entry list and panic if a mutation is attempted.
pub struct LookupTable<V> {
    name: &'static str,
    kind: MatchKind,
    dynamic: bool,
    entries: Vec<Entry<V>>,
    default: V,
    next_id: u32,
}

impl<V> LookupTable<V> {
    fn new(name: &'static str, kind: MatchKind, dynamic: bool, entries: Vec<Entry<V>>, default: V) -> Self {
        let next_id = entries_next_id(&entries);
        Self {
            name,
            kind,
            dynamic,
            entries,
            default,
            next_id,
        }
    }

    // ---- static constructors ----

    /// Build a static exact-match table from a fixed `(key, value)` list.
    pub fn new_static_plain(name: &'static str, entries: Vec<(Vec<u8>, V)>, default: V) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        let mut built = Vec::with_capacity(entries.len());
        for (id, (key, value)) in entries.into_iter().enumerate() {
            if !seen.insert(key.clone()) {
                return Err(Error::DuplicateKey { table: name });
            }
            built.push(Entry {
                id: id as u32,
                key,
                mask: Vec::new(),
                position: 0,
                prefix_len: 0,
                value,
            });
        }
        Ok(Self::new(name, MatchKind::Plain, false, built, default))
    }

    /// Build a static ternary table. `position` breaks ties when more than
    /// one entry's `key & mask` matches the lookup key; higher wins.
    pub fn new_static_ternary(
        name: &'static str,
        entries: Vec<(Vec<u8>, Vec<u8>, u32, V)>,
        default: V,
    ) -> Result<Self> {
        let built = entries
            .into_iter()
            .enumerate()
            .map(|(id, (key, mask, position, value))| Entry {
                id: id as u32,
                key,
                mask,
                position,
                prefix_len: 0,
                value,
            })
            .collect();
        Ok(Self::new(name, MatchKind::Ternary, false, built, default))
    }

    /// Build a static longest-prefix-match table from `(prefix, prefix_len,
    /// value)` triples.
    pub fn new_static_lpm(name: &'static str, entries: Vec<(Vec<u8>, u32, V)>, default: V) -> Result<Self> {
        let built = entries
            .into_iter()
            .enumerate()
            .map(|(id, (prefix, prefix_len, value))| Entry {
                id: id as u32,
                key: prefix,
                mask: Vec::new(),
                position: 0,
                prefix_len,
                value,
            })
            .collect();
        Ok(Self::new(name, MatchKind::Lpm, false, built, default))
    }

    // ---- dynamic constructors ----

    #[must_use]
    pub fn new_dynamic_plain(name: &'static str, default: V) -> Self {
        Self::new(name, MatchKind::Plain, true, Vec::new(), default)
    }

    #[must_use]
    pub fn new_dynamic_ternary(name: &'static str, default: V) -> Self {
        Self::new(name, MatchKind::Ternary, true, Vec::new(), default)
    }

    #[must_use]
    pub fn new_dynamic_lpm(name: &'static str, default: V) -> Self {
        Self::new(name, MatchKind::Lpm, true, Vec::new(), default)
    }

    fn require_dynamic(&self) {
        assert!(self.dynamic, "table {:?} is static and cannot be mutated", self.name);
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn add_plain(&mut self, key: Vec<u8>, value: V) -> Result<u32> {
        self.require_dynamic();
        assert_eq!(self.kind, MatchKind::Plain, "add_plain on a non-plain table");
        if self.entries.iter().any(|e| e.key == key) {
            return Err(Error::DuplicateKey { table: self.name });
        }
        let id = self.alloc_id();
        self.entries.push(Entry {
            id,
            key,
            mask: Vec::new(),
            position: 0,
            prefix_len: 0,
            value,
        });
        Ok(id)
    }

    pub fn add_ternary(&mut self, key: Vec<u8>, mask: Vec<u8>, position: u32, value: V) -> Result<u32> {
        self.require_dynamic();
        assert_eq!(self.kind, MatchKind::Ternary, "add_ternary on a non-ternary table");
        let id = self.alloc_id();
        self.entries.push(Entry {
            id,
            key,
            mask,
            position,
            prefix_len: 0,
            value,
        });
        Ok(id)
    }

    pub fn add_lpm(&mut self, prefix: Vec<u8>, prefix_len: u32, value: V) -> Result<u32> {
        self.require_dynamic();
        assert_eq!(self.kind, MatchKind::Lpm, "add_lpm on a non-lpm table");
        let id = self.alloc_id();
        self.entries.push(Entry {
            id,
            key: prefix,
            mask: Vec::new(),
            position: 0,
            prefix_len,
            value,
        });
        Ok(id)
    }

    pub fn del_by_id(&mut self, id: u32) -> Result<()> {
        self.require_dynamic();
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        if self.entries.len() == before {
            return Err(Error::UnknownEntryId { table: self.name, id });
        }
        Ok(())
    }

    pub fn del_by_key(&mut self, key: &[u8]) -> Result<()> {
        self.require_dynamic();
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        if self.entries.len() == before {
            return Err(Error::InvariantViolation("del_by_key: no entry with that key"));
        }
        Ok(())
    }

    pub fn change_by_id(&mut self, id: u32, value: V) -> Result<()> {
        self.require_dynamic();
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::UnknownEntryId { table: self.name, id })?;
        entry.value = value;
        Ok(())
    }

    // ---- lookup ----

    /// Look up `key`, returning the matched entry's value or the table's
    /// default if nothing matches.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> &V {
        match self.kind {
            MatchKind::Plain => self
                .entries
                .iter()
                .find(|e| e.key == key)
                .map_or(&self.default, |e| &e.value),
            MatchKind::Ternary => self
                .entries
                .iter()
                .filter(|e| ternary_matches(key, &e.key, &e.mask))
                .max_by_key(|e| e.position)
                .map_or(&self.default, |e| &e.value),
            MatchKind::Lpm => self
                .entries
                .iter()
                .filter(|e| lpm_matches(key, &e.key, e.prefix_len))
                .max_by_key(|e| e.prefix_len)
                .map_or(&self.default, |e| &e.value),
        }
    }

    /// Convenience wrapper for function-dispatch-style callers: look up
    /// `key` and invoke `f` with the matched (or default) value.
    pub fn dispatch<R>(&self, key: &[u8], f: impl FnOnce(&V) -> R) -> R {
        f(self.lookup(key))
    }

    /// Project `args` to a byte key via `P::project` and look it up,
    /// mirroring a `make_key`-then-table-lookup call pair collapsed into
    /// one step.
    #[must_use]
    pub fn lookup_by_args<P: KeyProjection<Args>, Args: ?Sized>(&self, args: &Args) -> &V {
        self.lookup(&P::project(args))
    }

    #[must_use]
    pub fn default_value(&self) -> &V {
        &self.default
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn entries_next_id<V>(entries: &[Entry<V>]) -> u32 {
    entries.iter().map(|e| e.id).max().map_or(0, |m| m + 1)
}

fn ternary_matches(key: &[u8], entry_key: &[u8], mask: &[u8]) -> bool {
    if key.len() != entry_key.len() || key.len() != mask.len() {
        return false;
    }
    key.iter()
        .zip(entry_key.iter())
        .zip(mask.iter())
        .all(|((k, ek), m)| (k & m) == (ek & m))
}

fn lpm_matches(key: &[u8], prefix: &[u8], prefix_len: u32) -> bool {
    let full_bytes = (prefix_len / 8) as usize;
    let rem_bits = prefix_len % 8;
    if key.len() < full_bytes + usize::from(rem_bits > 0) {
        return false;
    }
    if key[..full_bytes] != prefix[..full_bytes.min(prefix.len())] {
        return false;
    }
    if rem_bits > 0 {
        let mask = 0xFFu8 << (8 - rem_bits);
        let key_byte = key.get(full_bytes).copied().unwrap_or(0);
        let prefix_byte = prefix.get(full_bytes).copied().unwrap_or(0);
        if key_byte & mask != prefix_byte & mask {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_table_exact_match_and_default() {
        let table = LookupTable::new_static_plain(
            "proto",
            vec![(vec![6], "tcp"), (vec![17], "udp")],
            "unknown",
        )
        .unwrap();
        assert_eq!(*table.lookup(&[6]), "tcp");
        assert_eq!(*table.lookup(&[1]), "unknown");
    }

    #[test]
    fn duplicate_static_key_errors() {
        let err = LookupTable::new_static_plain("dup", vec![(vec![1], "a"), (vec![1], "b")], "x").unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
    }

    #[test]
    fn ternary_table_breaks_ties_by_position() {
        let table = LookupTable::new_static_ternary(
            "acl",
            vec![
                (vec![0x0A, 0x00], vec![0xFF, 0x00], 1, "low"),
                (vec![0x0A, 0x00], vec![0xFF, 0x00], 5, "high"),
            ],
            "deny",
        )
        .unwrap();
        assert_eq!(*table.lookup(&[0x0A, 0x12]), "high");
    }

    #[test]
    fn lpm_table_picks_longest_prefix() {
        let mut table = LookupTable::new_dynamic_lpm("routes", "no-route");
        table.add_lpm(vec![10, 0, 0, 0], 8, "via-a").unwrap();
        table.add_lpm(vec![10, 1, 0, 0], 16, "via-b").unwrap();
        assert_eq!(*table.lookup(&[10, 1, 2, 3]), "via-b");
        assert_eq!(*table.lookup(&[10, 2, 2, 3]), "via-a");
        assert_eq!(*table.lookup(&[192, 168, 0, 1]), "no-route");
    }

    #[test]
    fn dynamic_table_add_del_change() {
        let mut table = LookupTable::new_dynamic_plain("flows", 0u32);
        let id = table.add_plain(vec![1, 2], 100).unwrap();
        assert_eq!(*table.lookup(&[1, 2]), 100);
        table.change_by_id(id, 200).unwrap();
        assert_eq!(*table.lookup(&[1, 2]), 200);
        table.del_by_id(id).unwrap();
        assert_eq!(*table.lookup(&[1, 2]), 0);
    }

    #[test]
    #[should_panic(expected = "is static and cannot be mutated")]
    fn static_table_rejects_mutation() {
        let mut table = LookupTable::new_static_plain("s", vec![], "d").unwrap();
        let _ = table.add_plain(vec![1], "x");
    }

    /// A caller's native argument shape for a flow-classification table:
    /// `make_key` generalized from a `PortRange`-style probe struct to an
    /// arbitrary tuple of fields packed into a byte key.
    struct FlowArgs {
        src_port: u16,
        proto: u8,
    }

    struct FlowKey;

    impl KeyProjection<FlowArgs> for FlowKey {
        fn project(args: &FlowArgs) -> Vec<u8> {
            let mut key = args.src_port.to_be_bytes().to_vec();
            key.push(args.proto);
            key
        }
    }

    #[test]
    fn lookup_by_args_projects_then_looks_up() {
        let mut table = LookupTable::new_dynamic_plain("flows-by-args", "unmatched");
        let key = FlowKey::project(&FlowArgs { src_port: 443, proto: 6 });
        table.add_plain(key, "tls").unwrap();

        let hit = FlowArgs { src_port: 443, proto: 6 };
        assert_eq!(*table.lookup_by_args::<FlowKey, _>(&hit), "tls");

        let miss = FlowArgs { src_port: 80, proto: 6 };
        assert_eq!(*table.lookup_by_args::<FlowKey, _>(&miss), "unmatched");
    }
}
