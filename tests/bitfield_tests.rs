use remora::bitfield::Bitfield;

#[test]
fn test_new_bitfield_is_packed_and_empty() {
    let bitfield = Bitfield::new(10);

    for index in 0..10 {
        assert!(!bitfield.has(index));
    }
    // 10 pieces pack into 2 bytes
    assert_eq!(bitfield.as_bytes().len(), 2);
}

#[test]
fn test_set_and_has() {
    let mut bitfield = Bitfield::new(10);

    bitfield.set(0);
    bitfield.set(3);
    bitfield.set(9);

    assert!(bitfield.has(0));
    assert!(bitfield.has(3));
    assert!(bitfield.has(9));

    assert!(!bitfield.has(1));
    assert!(!bitfield.has(2));
    assert!(!bitfield.has(8));
}

#[test]
fn test_set_is_idempotent() {
    let mut bitfield = Bitfield::new(8);

    bitfield.set(5);
    let once = bitfield.as_bytes().to_vec();
    bitfield.set(5);

    assert!(bitfield.has(5));
    assert_eq!(bitfield.as_bytes(), &once[..]);
}

#[test]
fn test_msb_first_layout() {
    let mut bitfield = Bitfield::new(10);

    bitfield.set(0);
    bitfield.set(9);

    assert_eq!(bitfield.as_bytes()[0], 0b1000_0000);
    assert_eq!(bitfield.as_bytes()[1], 0b0100_0000);
}

#[test]
fn test_from_bytes() {
    let bitfield = Bitfield::from_bytes(vec![0b1010_1010]);

    assert!(bitfield.has(0));
    assert!(!bitfield.has(1));
    assert!(bitfield.has(2));
    assert!(!bitfield.has(7));
}

#[test]
fn test_has_out_of_range_is_false() {
    let bitfield = Bitfield::from_bytes(vec![0xFF]);

    assert!(bitfield.has(7));
    assert!(!bitfield.has(8));
    assert!(!bitfield.has(1000));
}

#[test]
fn test_set_grows_storage() {
    let mut bitfield = Bitfield::new(8);
    assert_eq!(bitfield.as_bytes().len(), 1);

    bitfield.set(12);

    assert_eq!(bitfield.as_bytes().len(), 2);
    assert!(bitfield.has(12));
    assert!(!bitfield.has(11));
}
