//! End-to-end encode/decode scenarios over the public surface.

use elekicore::pointer::{Counted, Weak};
use elekicore::serial::{
    decode_nodes, from_binary, to_binary, DataNode, Deserialize, Deserializer, ExternTable,
    NameTable, Serialize, Serializer,
};
use elekicore::Result;
use std::collections::HashMap;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// --- MOCK DATA STRUCTURES ---

#[derive(Default)]
struct Leaf {
    x: u8,
}

impl Serialize for Leaf {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("x", &self.x).end();
    }
}

impl Deserialize for Leaf {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("x", &mut self.x)
    }
}

#[derive(Default)]
struct Pair {
    left: Counted<Leaf>,
    right: Counted<Leaf>,
}

impl Serialize for Pair {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct()
            .field("left", &self.left)
            .field("right", &self.right)
            .end();
    }
}

impl Deserialize for Pair {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("left", &mut self.left)?;
        d.field("right", &mut self.right)?;
        Ok(())
    }
}

#[derive(Default)]
struct Ring {
    tag: u32,
    next: Weak<Ring>,
}

impl Serialize for Ring {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct()
            .field("tag", &self.tag)
            .field("next", &self.next)
            .end();
    }
}

impl Deserialize for Ring {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("tag", &mut self.tag)?;
        d.field("next", &mut self.next)?;
        Ok(())
    }
}

#[derive(Default)]
struct CycleA {
    peer: Counted<CycleB>,
}

#[derive(Default)]
struct CycleB {
    back: Weak<CycleA>,
}

impl Serialize for CycleA {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("peer", &self.peer).end();
    }
}

impl Deserialize for CycleA {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("peer", &mut self.peer)
    }
}

impl Serialize for CycleB {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("back", &self.back).end();
    }
}

impl Deserialize for CycleB {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("back", &mut self.back)
    }
}

#[derive(Default)]
struct Holder {
    allocator: Weak<Service>,
}

#[derive(Default)]
struct Service {
    id: u32,
}

impl Serialize for Service {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("id", &self.id).end();
    }
}

impl Deserialize for Service {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("id", &mut self.id)
    }
}

impl Serialize for Holder {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("allocator", &self.allocator).end();
    }
}

impl Deserialize for Holder {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("allocator", &mut self.allocator)
    }
}

#[derive(Default, Debug, PartialEq)]
struct Inventory {
    label: String,
    counts: HashMap<String, u32>,
    tags: Vec<String>,
    flavor: Option<f64>,
    sealed: bool,
}

impl Serialize for Inventory {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct()
            .field("label", &self.label)
            .field("counts", &self.counts)
            .field("tags", &self.tags)
            .field("flavor", &self.flavor)
            .field("sealed", &self.sealed)
            .end();
    }
}

impl Deserialize for Inventory {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("label", &mut self.label)?;
        d.field("counts", &mut self.counts)?;
        d.field("tags", &mut self.tags)?;
        d.field("flavor", &mut self.flavor)?;
        d.field("sealed", &mut self.sealed)?;
        Ok(())
    }
}

// --- SCENARIOS ---

#[test]
fn primitive_round_trip_is_byte_exact() {
    init();
    let blob = to_binary(&0x0102_0304u32, &NameTable::new());

    let mut expected = Vec::new();
    expected.extend_from_slice(b"ELEKIBINARY");
    expected.extend_from_slice(&1_220_701u32.to_le_bytes());
    expected.push(0);
    expected.extend_from_slice(&5u32.to_le_bytes()); // frame size: sign + 4
    expected.push(6); // U32 sign
    expected.extend_from_slice(&0x0102_0304u32.to_le_bytes());
    assert_eq!(blob.as_slice(), expected.as_slice());

    let nodes = decode_nodes(&blob);
    assert_eq!(nodes, vec![DataNode::U32(0x0102_0304)]);

    let target = Counted::new(0u32);
    assert!(from_binary(&target, &blob, &ExternTable::new()));
    assert_eq!(*target.get().unwrap(), 0x0102_0304);
}

#[test]
fn shared_child_keeps_one_instance() {
    init();
    let leaf = Counted::new(Leaf { x: 7 });
    let pair = Pair {
        left: leaf.clone(),
        right: leaf,
    };
    let blob = to_binary(&pair, &NameTable::new());

    let nodes = decode_nodes(&blob);
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].get("left"), Some(&DataNode::InsideRef(1)));
    assert_eq!(nodes[0].get("right"), Some(&DataNode::InsideRef(1)));

    let restored = Counted::new(Pair::default());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    let inner = restored.get().unwrap();
    assert_eq!(inner.left.get().unwrap().x, 7);
    // Sharing survives: both edges point at one allocation.
    assert!(std::ptr::eq(
        inner.left.get().unwrap(),
        inner.right.get().unwrap()
    ));
}

#[test]
fn self_loop_encodes_in_one_frame() {
    init();
    let ring = Counted::new(Ring {
        tag: 9,
        next: Weak::null(),
    });
    unsafe { (*ring.as_ptr()).next = ring.downgrade() };

    let blob = to_binary(ring.get().unwrap(), &NameTable::new());
    let nodes = decode_nodes(&blob);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].get("next"), Some(&DataNode::InsideRef(0)));

    let restored = Counted::new(Ring::default());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    let inner = restored.get().unwrap();
    assert_eq!(inner.tag, 9);
    assert!(std::ptr::eq(inner.next.get().unwrap(), inner));
}

#[test]
fn two_object_cycle_keeps_two_allocations() {
    init();
    let a = Counted::new(CycleA::default());
    let b = Counted::new(CycleB::default());
    unsafe {
        (*a.as_ptr()).peer = b.clone();
        (*b.as_ptr()).back = a.downgrade();
    }

    let blob = to_binary(a.get().unwrap(), &NameTable::new());
    assert_eq!(decode_nodes(&blob).len(), 2);

    let restored = Counted::new(CycleA::default());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    let root = restored.get().unwrap();
    let peer = root.peer.get().unwrap();
    // The cycle is closed onto the restored root, through a distinct peer
    // allocation.
    assert!(std::ptr::eq(peer.back.get().unwrap(), root));
    let peer_addr = peer as *const CycleB as usize;
    let root_addr = root as *const CycleA as usize;
    assert_ne!(peer_addr, root_addr);
}

#[test]
fn external_name_replaces_instance_frame() {
    init();
    let service = Counted::new(Service { id: 5 });
    let holder = Holder {
        allocator: service.downgrade(),
    };
    let mut names = NameTable::new();
    names.insert(&service, "Memory::allocator");

    let blob = to_binary(&holder, &names);
    let nodes = decode_nodes(&blob);
    assert_eq!(nodes.len(), 1, "named targets get no frame");
    assert_eq!(
        nodes[0].get("allocator"),
        Some(&DataNode::OutsideRef("Memory::allocator".into()))
    );

    // With the name registered, the decoded edge points at the registered
    // payload itself.
    let replacement = Counted::new(Service { id: 99 });
    let mut externs = ExternTable::new();
    externs.insert("Memory::allocator", &replacement);
    let restored = Counted::new(Holder::default());
    assert!(from_binary(&restored, &blob, &externs));
    assert!(std::ptr::eq(
        restored.get().unwrap().allocator.get().unwrap(),
        replacement.get().unwrap()
    ));

    // Without it, the whole decode fails.
    let bare = Counted::new(Holder::default());
    assert!(!from_binary(&bare, &blob, &ExternTable::new()));
}

#[test]
fn null_edge_is_nil_not_reference() {
    init();
    let holder = Holder {
        allocator: Weak::null(),
    };
    let blob = to_binary(&holder, &NameTable::new());
    let nodes = decode_nodes(&blob);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].get("allocator"), Some(&DataNode::Nil));

    let live = Counted::new(Service { id: 1 });
    let restored = Counted::new(Holder {
        allocator: live.downgrade(),
    });
    assert!(!restored.get().unwrap().allocator.is_null());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    assert!(restored.get().unwrap().allocator.is_null());
}

#[test]
fn containers_round_trip_structurally() {
    init();
    let mut counts = HashMap::new();
    counts.insert("potion".to_owned(), 3u32);
    counts.insert("sword".to_owned(), 1u32);
    let inventory = Inventory {
        label: "satchel".into(),
        counts,
        tags: vec!["starter".into(), "cloth".into()],
        flavor: Some(0.25),
        sealed: true,
    };

    let blob = to_binary(&inventory, &NameTable::new());
    let restored = Counted::new(Inventory::default());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    assert_eq!(restored.get().unwrap(), &inventory);
}

#[test]
fn map_entries_encode_as_key_value_structs() {
    init();
    let mut counts = HashMap::new();
    counts.insert("potion".to_owned(), 3u32);
    let blob = to_binary(&counts, &NameTable::new());

    let nodes = decode_nodes(&blob);
    let DataNode::Array(entries) = &nodes[0] else {
        panic!("map must encode as an array, got {:?}", nodes[0]);
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].get("key"), Some(&DataNode::Str("potion".into())));
    assert_eq!(entries[0].get("value"), Some(&DataNode::U32(3)));
}

#[test]
fn weak_only_instance_dies_with_the_session() {
    init();
    let leaf = Counted::new(Leaf { x: 3 });
    let holder = WeakOnly {
        w: leaf.downgrade(),
    };
    let blob = to_binary(&holder, &NameTable::new());
    assert_eq!(decode_nodes(&blob).len(), 2, "the weak edge still emits a frame");

    let restored = Counted::new(WeakOnly::default());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    // Nothing strong survived the decode session, so the edge observes null.
    assert!(restored.get().unwrap().w.is_null());
}

#[derive(Default)]
struct WeakOnly {
    w: Weak<Leaf>,
}

impl Serialize for WeakOnly {
    fn serialize(&self, s: &mut Serializer<'_>) {
        s.begin_struct().field("w", &self.w).end();
    }
}

impl Deserialize for WeakOnly {
    fn deserialize(&mut self, d: &mut Deserializer<'_, '_>) -> Result<()> {
        d.field("w", &mut self.w)
    }
}

#[test]
fn wide_graph_encodes_every_instance() {
    init();
    // Enough distinct referents to put real work on the pool.
    let leaves: Vec<Counted<Leaf>> = (0..64).map(|i| Counted::new(Leaf { x: i as u8 })).collect();
    let blob = to_binary(&leaves, &NameTable::new());

    let nodes = decode_nodes(&blob);
    assert_eq!(nodes.len(), 65);

    let restored: Counted<Vec<Counted<Leaf>>> = Counted::new(Vec::new());
    assert!(from_binary(&restored, &blob, &ExternTable::new()));
    let restored = restored.get().unwrap();
    assert_eq!(restored.len(), 64);
    for (i, leaf) in restored.iter().enumerate() {
        assert_eq!(leaf.get().unwrap().x, i as u8);
    }
}
