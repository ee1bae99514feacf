use std::any::Any;

use particle_orchestrator::buffers::traits::{Info, Pos, Pressure, Vel};
use particle_orchestrator::buffers::{buffer_info, names_of, AbstractBuffer, BufferList, BufferTrait};
use particle_orchestrator::flags::{
    iter_buffers, BUFFERS_ALL_DBL, BUFFERS_POS_VEL_INFO, BUFFER_INFO, BUFFER_POS, BUFFER_VEL,
};
use particle_orchestrator::SimError;

#[test]
fn test_lookup_miss_and_duplicate_insert() {
    let mut list = BufferList::new();
    list.add::<Pos>(0).unwrap();
    list.add::<Vel>(0).unwrap();
    list.alloc_all(4).unwrap();

    list.get_buffer_data_mut::<Pos>(0).unwrap()[2] = [1.0, 2.0, 3.0, 4.0];

    // never inserted
    assert!(list.get(BUFFER_INFO).is_none());
    assert!(list.get_buffer::<Info>().is_none());
    assert!(list.get_buffer_data::<Info>(0).is_none());

    // second POS is refused and the original data survives
    let duplicate = Box::new(Pos::buffer(-1));
    let err = list.insert(duplicate).unwrap_err();
    assert!(matches!(err, SimError::DuplicateKey { key, .. } if key == BUFFER_POS));
    assert!(!err.is_fatal());

    let pos = list.get_buffer_data::<Pos>(0).unwrap();
    assert_eq!(pos.len(), 4);
    assert_eq!(pos[2], [1.0, 2.0, 3.0, 4.0]);
    assert_eq!(list.get_buffer::<Pos>().unwrap().init_value(), 0);
    assert_eq!(list.len(), 2);
}

/// Claims the POS key with single-slot `u32` storage
struct ForgedPosition;

impl AbstractBuffer for ForgedPosition {
    fn key(&self) -> u32 {
        BUFFER_POS
    }

    fn element_size(&self) -> usize {
        4
    }

    fn array_count(&self) -> usize {
        1
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[test]
fn test_insert_rejects_buffer_not_matching_its_family() {
    let mut list = BufferList::new();
    let err = list.insert(Box::new(ForgedPosition)).unwrap_err();
    assert!(matches!(
        err,
        SimError::FamilyMismatch { key, element_size: 4, slots: 1, .. } if key == BUFFER_POS
    ));
    assert!(err.is_fatal());
    assert!(!list.contains(BUFFER_POS));

    // a Velocity buffer cannot stand in for Position either
    let mut velocity = Vel::buffer(0);
    velocity.alloc(2).unwrap();
    list.insert(Box::new(velocity)).unwrap();
    assert!(list.get_buffer::<Pos>().is_none());

    // the registry-built buffer is accepted and found by its typed accessor
    list.insert(Box::new(Pos::buffer(0))).unwrap();
    assert_eq!(list.get_buffer::<Pos>().unwrap().array_count(), Pos::SLOTS);
}

#[test]
fn test_mask_population_matches_registry() {
    let mut list = BufferList::new();
    list.add_mask(BUFFERS_ALL_DBL, 0).unwrap();
    assert_eq!(list.keys_mask(), BUFFERS_ALL_DBL);

    for (key, buffer) in list.iter() {
        let info = buffer_info(key).unwrap();
        assert_eq!(buffer.array_count(), 2, "{} is double buffered", info.name);
        assert_eq!(buffer.element_size(), info.element_size);
        assert_eq!(buffer.name().unwrap(), info.name);
        assert!(!buffer.is_allocated());
    }

    assert_eq!(names_of(BUFFERS_POS_VEL_INFO), vec!["Position", "Info", "Velocity"]);
}

#[test]
fn test_allocation_sizes_and_init_pattern() {
    let mut list = BufferList::new();
    list.add::<Pos>(0).unwrap();
    list.add::<Pressure>(-1).unwrap();

    let bytes = list.alloc_all(10).unwrap();
    // two slots of 10 float4 plus two slots of 10 floats
    assert_eq!(bytes, 2 * 10 * 16 + 2 * 10 * 4);

    // memset(-1) gives all-ones bytes, i.e. a NaN bit pattern
    let pressure = list.get_buffer_data::<Pressure>(1).unwrap();
    assert!(pressure.iter().all(|p| p.to_bits() == u32::MAX));

    let raw = list.get(BUFFER_POS).unwrap().bytes(1).unwrap();
    assert_eq!(raw.len(), 160);
    assert!(raw.iter().all(|&b| b == 0));
    assert!(list.get(BUFFER_POS).unwrap().bytes(2).is_none());
}

#[test]
fn test_untyped_swap_and_offsets() {
    let mut list = BufferList::new();
    list.add::<Vel>(0).unwrap();
    list.alloc_all(3).unwrap();
    {
        let vel = list.get_buffer_data_mut::<Vel>(1).unwrap();
        vel[0] = [1.0; 4];
        vel[2] = [3.0; 4];
    }

    let buffer = list.get_mut(BUFFER_VEL).unwrap();
    buffer.swap_elements(0, 2, 1).unwrap();
    assert!(buffer.swap_elements(0, 3, 1).is_err());

    let tail = buffer.offset_bytes(1, 2).unwrap().unwrap();
    assert_eq!(tail.len(), 16);
    assert!(buffer.offset_bytes(1, 4).unwrap().is_none());

    let vel = list.get_buffer_data::<Vel>(1).unwrap();
    assert_eq!(vel[0], [3.0; 4]);
    assert_eq!(vel[2], [1.0; 4]);
}

#[test]
fn test_clear_and_remove() {
    let mut list = BufferList::new();
    for key in iter_buffers(BUFFERS_POS_VEL_INFO) {
        list.add_key(key, 0).unwrap();
    }
    let removed = list.remove(BUFFER_INFO).unwrap();
    assert_eq!(removed.key(), BUFFER_INFO);
    assert!(!list.contains(BUFFER_INFO));

    list.clear();
    assert!(list.is_empty());
    assert!(matches!(list.add_key(1, 0), Err(SimError::UnknownBuffer { key: 1 })));
}
