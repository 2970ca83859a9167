//! Fixed-capacity row store for one sensor field
//!
//! Rows are `width` f32 values stored contiguously. Appending never
//! reallocates; a full buffer rejects further rows until it is cleared or
//! shifted.

use crate::error::{Error, Result};

/// Fixed-capacity buffer of equally sized rows
#[derive(Debug, Clone)]
pub struct RowBuffer {
    width: usize,
    capacity: usize,
    len: usize,
    data: Vec<f32>,
}

impl RowBuffer {
    pub fn new(width: usize, capacity: usize) -> Self {
        Self {
            width,
            capacity,
            len: 0,
            data: vec![0.0; width * capacity],
        }
    }

    /// Values per row
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows stored (also the index of the next row)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    /// Append one row
    ///
    /// # Panics
    ///
    /// If `row.len()` differs from the buffer width.
    pub fn push(&mut self, row: &[f32]) -> Result<()> {
        assert_eq!(row.len(), self.width, "row width mismatch");
        if self.is_full() {
            return Err(Error::BufferFull("row buffer"));
        }
        let start = self.len * self.width;
        self.data[start..start + self.width].copy_from_slice(row);
        self.len += 1;
        Ok(())
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        (index < self.len).then(|| &self.data[index * self.width..(index + 1) * self.width])
    }

    /// Newest row
    pub fn last(&self) -> Option<&[f32]> {
        self.len.checked_sub(1).and_then(|i| self.row(i))
    }

    /// Stored rows, oldest first
    pub fn rows(&self) -> impl ExactSizeIterator<Item = &[f32]> + '_ {
        self.data[..self.len * self.width].chunks_exact(self.width.max(1))
    }

    /// Forget every row
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Drop the oldest row, moving the rest one slot towards the front
    pub fn shift(&mut self) {
        if self.len == 0 {
            return;
        }
        self.data.copy_within(self.width..self.len * self.width, 0);
        self.len -= 1;
    }

    /// Element-wise mean of the newest `n` rows (fewer if not yet stored)
    pub fn mean_of_last(&self, n: usize) -> Option<Vec<f32>> {
        let count = n.min(self.len);
        if count == 0 {
            return None;
        }
        let mut mean = vec![0.0f32; self.width];
        for row in self.rows().skip(self.len - count) {
            for (acc, v) in mean.iter_mut().zip(row) {
                *acc += v;
            }
        }
        for acc in &mut mean {
            *acc /= count as f32;
        }
        Some(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: &[f32]) -> RowBuffer {
        let mut buf = RowBuffer::new(1, values.len());
        for v in values {
            buf.push(&[*v]).unwrap();
        }
        buf
    }

    #[test]
    fn test_push_until_full() {
        let mut buf = RowBuffer::new(2, 2);
        assert!(buf.is_empty());
        buf.push(&[1.0, 2.0]).unwrap();
        buf.push(&[3.0, 4.0]).unwrap();
        assert!(buf.is_full());
        assert!(matches!(buf.push(&[5.0, 6.0]), Err(Error::BufferFull(_))));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.last(), Some(&[3.0, 4.0][..]));
    }

    #[test]
    fn test_rows_in_order() {
        let buf = filled(&[1.0, 2.0, 3.0]);
        let rows: Vec<_> = buf.rows().map(|r| r[0]).collect();
        assert_eq!(rows, vec![1.0, 2.0, 3.0]);
        assert_eq!(buf.row(3), None);
    }

    #[test]
    fn test_shift_drops_oldest() {
        let mut buf = filled(&[1.0, 2.0, 3.0]);
        buf.shift();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.row(0), Some(&[2.0][..]));
        buf.push(&[4.0]).unwrap();
        let rows: Vec<_> = buf.rows().map(|r| r[0]).collect();
        assert_eq!(rows, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_mean_of_last() {
        let buf = filled(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(buf.mean_of_last(5), Some(vec![5.0]));

        let short = filled(&[2.0, 4.0]);
        assert_eq!(short.mean_of_last(5), Some(vec![3.0]));

        assert_eq!(RowBuffer::new(3, 4).mean_of_last(5), None);
    }

    #[test]
    fn test_clear_resets_cursor() {
        let mut buf = filled(&[1.0, 2.0]);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.last(), None);
        buf.push(&[9.0]).unwrap();
        assert_eq!(buf.row(0), Some(&[9.0][..]));
    }
}
