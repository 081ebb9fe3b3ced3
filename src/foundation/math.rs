pub(crate) fn mul_div255_u16(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

pub(crate) fn mul_div255_u8(x: u16, y: u16) -> u8 {
    mul_div255_u16(x, y) as u8
}

pub(crate) fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

/// Round and clamp a `0..=255` float channel into a byte.
pub(crate) fn unit255_to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Premultiplied RGBA8 pixel to straight `0..=255` float channels.
pub(crate) fn unpremultiply(px: [u8; 4]) -> [f32; 4] {
    let a = px[3];
    if a == 0 {
        return [0.0; 4];
    }
    let k = 255.0 / f32::from(a);
    [
        (f32::from(px[0]) * k).min(255.0),
        (f32::from(px[1]) * k).min(255.0),
        (f32::from(px[2]) * k).min(255.0),
        f32::from(a),
    ]
}

/// Straight `0..=255` float channels to a premultiplied RGBA8 pixel.
pub(crate) fn premultiply(px: [f32; 4]) -> [u8; 4] {
    let a = unit255_to_u8(px[3]);
    if a == 0 {
        return [0; 4];
    }
    let a16 = u16::from(a);
    [
        mul_div255_u8(u16::from(unit255_to_u8(px[0])), a16),
        mul_div255_u8(u16::from(unit255_to_u8(px[1])), a16),
        mul_div255_u8(u16::from(unit255_to_u8(px[2])), a16),
        a,
    ]
}

pub(crate) fn premul_rgba8(rgba: [u8; 4]) -> [u8; 4] {
    let [r, g, b, a] = rgba;
    let a16 = u16::from(a);
    [
        mul_div255_u8(u16::from(r), a16),
        mul_div255_u8(u16::from(g), a16),
        mul_div255_u8(u16::from(b), a16),
        a,
    ]
}

/// 64-bit xxh3 fingerprint over a byte stream.
pub(crate) fn fingerprint_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
