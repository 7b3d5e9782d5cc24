// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use privops_proto::*;

#[test]
fn test_handle_pack_unpack() {
    let raw = RawFileHandle::pack(7, 42);
    assert_eq!(raw.volume(), 7);
    assert_eq!(raw.object(), 42);
}

#[test]
fn test_handle_roundtrips_through_bytes() {
    let raw = RawFileHandle::pack(u64::MAX, 1);
    let decoded = handle_from_bytes(raw.as_bytes()).unwrap();
    assert_eq!(decoded, raw);
}

#[test]
fn test_handle_rejects_short_buffer() {
    let err = handle_from_bytes(&[0u8; 8]).unwrap_err();
    assert!(matches!(err, ValidationError::HandleSize(8)));
}

#[test]
fn test_handle_rejects_long_buffer() {
    let err = handle_from_bytes(&[0u8; 32]).unwrap_err();
    assert!(matches!(err, ValidationError::HandleSize(32)));
}

#[test]
fn test_getfh_flags_accepts_nofollow() {
    assert!(validate_getfh_flags(0).is_ok());
    assert!(validate_getfh_flags(GETFH_NOFOLLOW).is_ok());
}

#[test]
fn test_getfh_flags_rejects_unknown_bits() {
    let err = validate_getfh_flags(GETFH_NOFOLLOW | 0x8000_0000).unwrap_err();
    assert!(matches!(err, ValidationError::Flags(0x8000_0000)));
}

#[test]
fn test_group_count_allows_effective_slot() {
    // max_groups supplementary entries plus the effective group at index 0
    assert!(validate_group_count(16, 16).is_ok());
    assert!(validate_group_count(17, 16).is_ok());
    assert!(validate_group_count(18, 16).is_err());
}

#[test]
fn test_handle_serde_roundtrip() {
    let raw = RawFileHandle::pack(3, 9);
    let json = serde_json::to_string(&raw).unwrap();
    let back: RawFileHandle = serde_json::from_str(&json).unwrap();
    assert_eq!(back, raw);
}

#[test]
fn test_handle_display_is_hex() {
    let raw = RawFileHandle::pack(1, 0);
    let s = raw.to_string();
    assert_eq!(s.len(), 32);
    assert_eq!(&s[0..2], "01");
}
