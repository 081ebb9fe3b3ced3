use super::*;

#[test]
fn mul_div255_rounds_to_nearest() {
    assert_eq!(mul_div255_u8(255, 255), 255);
    assert_eq!(mul_div255_u8(128, 255), 128);
    assert_eq!(mul_div255_u8(128, 128), 64);
    assert_eq!(mul_div255_u8(0, 200), 0);
}

#[test]
fn premultiply_then_unpremultiply_is_close() {
    let straight = [200.0, 100.0, 50.0, 128.0];
    let p = premultiply(straight);
    assert_eq!(p[3], 128);
    let back = unpremultiply(p);
    for c in 0..3 {
        assert!((back[c] - straight[c]).abs() <= 2.0, "channel {c}: {back:?}");
    }
}

#[test]
fn transparent_pixels_unpremultiply_to_zero() {
    assert_eq!(unpremultiply([10, 10, 10, 0]), [0.0; 4]);
    assert_eq!(premultiply([255.0, 255.0, 255.0, 0.0]), [0; 4]);
}

#[test]
fn fingerprint_is_stable_for_equal_input() {
    assert_eq!(fingerprint_bytes(b"abc"), fingerprint_bytes(b"abc"));
    assert_ne!(fingerprint_bytes(b"abc"), fingerprint_bytes(b"abd"));
}
