use super::*;

#[test]
fn pool_honors_bucket_cap() {
    let mut p = SurfacePool::new(SurfacePoolOpts {
        max_pool_bytes: 1 << 30,
        max_surfaces_per_bucket: 1,
    });
    let a = p.acquire(8, 8);
    let b = p.acquire(8, 8);
    p.release(a);
    p.release(b);
    assert_eq!(p.stats().retained_surfaces, 1);
    assert_eq!(p.stats().alloc_surfaces, 2);
}

#[test]
fn pool_honors_global_byte_cap() {
    let bytes_8x8 = SurfaceKey { w: 8, h: 8 }.byte_len();
    let mut p = SurfacePool::new(SurfacePoolOpts {
        max_pool_bytes: bytes_8x8,
        max_surfaces_per_bucket: 8,
    });
    let a = p.acquire(8, 8);
    let b = p.acquire(8, 8);
    p.release(a);
    p.release(b);
    let st = p.stats();
    assert_eq!(st.retained_bytes, bytes_8x8);
    assert_eq!(st.retained_surfaces, 1);
    assert!(st.dropped_on_release >= 1);
}

#[test]
fn reused_surfaces_come_back_transparent() {
    let mut p = SurfacePool::default();
    let mut a = p.acquire(4, 4);
    a.data_as_u8_slice_mut().fill(200);
    p.release(a);
    let b = p.acquire(4, 4);
    assert!(b.data_as_u8_slice().iter().all(|&v| v == 0));
    assert_eq!(p.stats().alloc_surfaces, 1);
}

#[test]
fn oversized_surfaces_are_rejected() {
    assert!(surface_size(70_000, 1).is_err());
    assert_eq!(surface_size(640, 480).unwrap(), (640, 480));
}
