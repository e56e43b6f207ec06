pub fn normalize_rgba_color(color: &[u8; 4]) -> [f32; 4] {
    [
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
        color[3] as f32 / 255.0,
    ]
}

#[inline(always)]
pub fn to_logical(physical_size: (u32, u32), scale_factor: f64) -> (f32, f32) {
    let (physical_width, physical_height) = physical_size;
    let logical_width = physical_width as f64 / scale_factor;
    let logical_height = physical_height as f64 / scale_factor;
    (logical_width as f32, logical_height as f32)
}

/// Releases the allocation of a scratch vector that grew past `max_capacity`
/// during an unusually large frame.
pub(crate) fn trim_vector_if_needed<T>(vector: &mut Vec<T>, max_capacity: usize) {
    if vector.capacity() > max_capacity {
        vector.clear();
        vector.shrink_to(max_capacity);
    }
}

/// Rounds half away from zero, matching how device rects are snapped to pixels.
#[inline(always)]
pub(crate) fn round_to_pixel(value: f32) -> i32 {
    value.round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_logical_divides_by_scale_factor() {
        assert_eq!(to_logical((200, 100), 2.0), (100.0, 50.0));
    }

    #[test]
    fn trim_vector_keeps_small_allocations() {
        let mut vector: Vec<u32> = Vec::with_capacity(8);
        vector.push(1);
        trim_vector_if_needed(&mut vector, 64);
        assert_eq!(vector.len(), 1);
    }

    #[test]
    fn trim_vector_releases_large_allocations() {
        let mut vector: Vec<u32> = Vec::with_capacity(1024);
        vector.push(1);
        trim_vector_if_needed(&mut vector, 64);
        assert!(vector.is_empty());
        assert!(vector.capacity() <= 1024);
    }
}
