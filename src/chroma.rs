//! Nearest-neighbor chroma iterators
//!
//! Combine Y, U, V plane rows into per-pixel triples, replicating each
//! subsampled chroma sample over the luma samples it covers. Odd widths and
//! heights are handled by the zips stopping at the luma plane's edge.

use yuv_pixel::YUV;

fn repeat_each<'a, T: Copy + 'a>(row: &'a [T], n: usize) -> impl Iterator<Item = T> + 'a {
    row.iter().flat_map(move |&px| std::iter::repeat_n(px, n))
}

fn zip_row<'a, T: Copy + 'a>(
    y: &'a [T],
    u: impl Iterator<Item = T> + 'a,
    v: impl Iterator<Item = T> + 'a,
) -> impl Iterator<Item = YUV<T>> + 'a {
    y.iter()
        .copied()
        .zip(u.zip(v))
        .map(|(y, (u, v))| YUV { y, u, v })
}

/// Equal-sized Y, U, V planes (4:4:4)
pub fn yuv_444<'a, T: Copy + 'a>(
    y: impl Iterator<Item = &'a [T]> + 'a,
    u: impl Iterator<Item = &'a [T]> + 'a,
    v: impl Iterator<Item = &'a [T]> + 'a,
) -> impl Iterator<Item = YUV<T>> + 'a {
    y.zip(u.zip(v))
        .flat_map(|(y, (u, v))| zip_row(y, u.iter().copied(), v.iter().copied()))
}

/// U and V at half width (4:2:2)
pub fn yuv_422<'a, T: Copy + 'a>(
    y: impl Iterator<Item = &'a [T]> + 'a,
    u: impl Iterator<Item = &'a [T]> + 'a,
    v: impl Iterator<Item = &'a [T]> + 'a,
) -> impl Iterator<Item = YUV<T>> + 'a {
    y.zip(u.zip(v))
        .flat_map(|(y, (u, v))| zip_row(y, repeat_each(u, 2), repeat_each(v, 2)))
}

/// U and V at half width and half height (4:2:0)
pub fn yuv_420<'a, T: Copy + 'a>(
    y: impl Iterator<Item = &'a [T]> + 'a,
    u: impl Iterator<Item = &'a [T]> + 'a,
    v: impl Iterator<Item = &'a [T]> + 'a,
) -> impl Iterator<Item = YUV<T>> + 'a {
    let u = u.flat_map(|row| std::iter::repeat_n(row, 2));
    let v = v.flat_map(|row| std::iter::repeat_n(row, 2));
    yuv_422(y, u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples<T: Copy>(px: impl Iterator<Item = YUV<T>>) -> Vec<(T, T, T)> {
        px.map(|p| (p.y, p.u, p.v)).collect()
    }

    #[test]
    fn odd_sized_420_covers_every_luma_sample() {
        let y: Vec<u16> = (0..15).collect();
        let u = [100u16, 101, 102, 110, 111, 112];
        let v = [200u16, 201, 202, 210, 211, 212];
        let px = triples(yuv_420(y.chunks(5), u.chunks(3), v.chunks(3)));
        assert_eq!(px.len(), 15);
        assert_eq!(px[4], (4, 102, 202));
        assert_eq!(px[5], (5, 100, 200));
        assert_eq!(px[14], (14, 112, 212));
    }

    #[test]
    fn rows_422_keep_their_own_chroma() {
        let y = [1u8, 2, 3, 4];
        let u = [10u8, 20];
        let v = [30u8, 40];
        let px = triples(yuv_422(y.chunks(2), u.chunks(1), v.chunks(1)));
        assert_eq!(px[1], (2, 10, 30));
        assert_eq!(px[2], (3, 20, 40));
    }
}
