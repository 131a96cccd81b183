//! Disk-spilling record sequences with external merge sort.
//!
//! A [`Sequence`] is an append-only buffer of fixed-size records that never
//! assumes its contents fit in memory: appends accumulate in a bounded tail and
//! spill to a temp file, sorting streams the data in budget-sized chunks, sorts
//! each chunk in memory, and k-way merges the resulting runs back into fresh
//! storage. A sequence can be re-sorted any number of times under different
//! comparators; no stability is guaranteed.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use anyhow::{Context, Result};
use rayon::slice::ParallelSliceMut;
use tempfile::NamedTempFile;

use crate::records::Record;

/// Default size of the in-memory tail before it spills to disk.
const WRITE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// An unsorted-on-append, externally sortable sequence of fixed-size records.
pub struct Sequence<T: Record> {
    spill: Option<NamedTempFile>,
    /// Records already flushed to `spill`, in append order.
    spilled: u64,
    tail: Vec<T>,
    write_buffer_bytes: usize,
}

impl<T: Record> Sequence<T> {
    pub fn new() -> Self {
        Self::with_write_buffer(WRITE_BUFFER_BYTES)
    }

    /// A sequence with a custom tail size. Small values force early spills,
    /// which is mainly useful for exercising the disk paths in tests.
    pub fn with_write_buffer(bytes: usize) -> Self {
        Self {
            spill: None,
            spilled: 0,
            tail: Vec::new(),
            write_buffer_bytes: bytes.max(T::ENCODED_SIZE),
        }
    }

    pub fn len(&self) -> u64 {
        self.spilled + self.tail.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, record: T) -> Result<()> {
        self.tail.push(record);
        if self.tail.len() * T::ENCODED_SIZE >= self.write_buffer_bytes {
            self.flush_tail()?;
        }
        Ok(())
    }

    fn flush_tail(&mut self) -> Result<()> {
        if self.tail.is_empty() {
            return Ok(());
        }
        if self.spill.is_none() {
            self.spill = Some(NamedTempFile::new().context("Failed to create spill file")?);
        }
        let mut buf = Vec::with_capacity(self.tail.len() * T::ENCODED_SIZE);
        for record in &self.tail {
            record.encode(&mut buf);
        }
        // The spill handle is only ever used for appending; readers open the
        // path independently so they get their own cursor.
        if let Some(spill) = self.spill.as_mut() {
            let file = spill.as_file_mut();
            file.seek(SeekFrom::End(0))?;
            file.write_all(&buf).context("Failed to write spill file")?;
        }
        self.spilled += self.tail.len() as u64;
        self.tail.clear();
        Ok(())
    }

    /// A sequential cursor over the current contents. The cursor owns its file
    /// handle and a snapshot of the in-memory tail, so it stays valid while
    /// other sequences are scanned or this one is replaced. Appending while a
    /// reader is open is not supported.
    pub fn reader(&self) -> Result<SequenceReader<T>> {
        let file = match &self.spill {
            Some(spill) => Some(BufReader::new(
                File::open(spill.path()).context("Failed to reopen spill file")?,
            )),
            None => None,
        };
        SequenceReader::new(file, self.spilled, self.tail.clone())
    }

    /// Sort in place under `cmp`, using at most `mem_budget` bytes of record
    /// memory per run. The comparator must be a pure total order.
    pub fn sort_by<F>(&mut self, mem_budget: usize, cmp: F) -> Result<()>
    where
        F: Fn(&T, &T) -> Ordering + Sync,
    {
        if self.len() <= 1 {
            return Ok(());
        }
        let run_records = (mem_budget / T::ENCODED_SIZE).max(1);

        let mut runs: Vec<RunCursor<T>> = Vec::new();
        {
            let mut reader = self.reader()?;
            let mut chunk: Vec<T> = Vec::with_capacity(run_records.min(self.len() as usize));
            while let Some(record) = reader.peek() {
                chunk.push(record.clone());
                reader.advance()?;
                if chunk.len() >= run_records {
                    runs.push(write_run(&mut chunk, &cmp)?);
                }
            }
            if !chunk.is_empty() {
                runs.push(write_run(&mut chunk, &cmp)?);
            }
        }

        let mut merged = Sequence::with_write_buffer(self.write_buffer_bytes);
        merge_runs(runs, &cmp, &mut merged)?;
        debug_assert_eq!(merged.len(), self.len());
        *self = merged;
        Ok(())
    }

    /// Collapse adjacent equal records, keeping the first of each group.
    pub fn dedup(&mut self) -> Result<()>
    where
        T: PartialEq,
    {
        let mut out = Sequence::with_write_buffer(self.write_buffer_bytes);
        let mut reader = self.reader()?;
        let mut last: Option<T> = None;
        while let Some(record) = reader.peek() {
            if last.as_ref() != Some(record) {
                out.push(record.clone())?;
                last = Some(record.clone());
            }
            reader.advance()?;
        }
        *self = out;
        Ok(())
    }
}

/// Forward cursor over a [`Sequence`]: `peek` the current record, `advance` to
/// the next. `peek` returns `None` once the sequence is exhausted.
pub struct SequenceReader<T: Record> {
    file: Option<BufReader<File>>,
    remaining: u64,
    tail: std::vec::IntoIter<T>,
    current: Option<T>,
    buf: Vec<u8>,
}

impl<T: Record> SequenceReader<T> {
    fn new(file: Option<BufReader<File>>, spilled: u64, tail: Vec<T>) -> Result<Self> {
        let mut reader = Self {
            file,
            remaining: spilled,
            tail: tail.into_iter(),
            current: None,
            buf: vec![0u8; T::ENCODED_SIZE],
        };
        reader.advance()?;
        Ok(reader)
    }

    pub fn peek(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn advance(&mut self) -> Result<()> {
        if self.remaining > 0 {
            if let Some(file) = self.file.as_mut() {
                file.read_exact(&mut self.buf)
                    .context("Failed to read spill file")?;
                self.remaining -= 1;
                self.current = Some(T::decode(&self.buf)?);
                return Ok(());
            }
        }
        self.current = self.tail.next();
        Ok(())
    }
}

/// One sorted run on disk, positioned at its first record.
struct RunCursor<T: Record> {
    reader: BufReader<File>,
    remaining: u64,
    head: Option<T>,
    buf: Vec<u8>,
}

impl<T: Record> RunCursor<T> {
    fn refill(&mut self) -> Result<()> {
        if self.remaining == 0 {
            self.head = None;
            return Ok(());
        }
        self.reader
            .read_exact(&mut self.buf)
            .context("Failed to read sorted run")?;
        self.remaining -= 1;
        self.head = Some(T::decode(&self.buf)?);
        Ok(())
    }
}

/// Sort `chunk` and write it out as a run, draining the chunk for reuse.
fn write_run<T, F>(chunk: &mut Vec<T>, cmp: &F) -> Result<RunCursor<T>>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    chunk.par_sort_unstable_by(|a, b| cmp(a, b));

    let file = tempfile::tempfile().context("Failed to create run file")?;
    let mut writer = BufWriter::new(file);
    let mut buf = Vec::with_capacity(T::ENCODED_SIZE);
    for record in chunk.iter() {
        buf.clear();
        record.encode(&mut buf);
        writer.write_all(&buf)?;
    }
    writer.flush()?;

    let mut file = writer
        .into_inner()
        .context("Failed to flush run file")?;
    file.seek(SeekFrom::Start(0))?;

    let mut run = RunCursor {
        reader: BufReader::new(file),
        remaining: chunk.len() as u64,
        head: None,
        buf: vec![0u8; T::ENCODED_SIZE],
    };
    run.refill()?;
    chunk.clear();
    Ok(run)
}

/// K-way merge of sorted runs into `out`, driven by an index heap over the run
/// heads. Every run on the heap holds a head record.
fn merge_runs<T, F>(mut runs: Vec<RunCursor<T>>, cmp: &F, out: &mut Sequence<T>) -> Result<()>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    let mut heap: Vec<usize> = (0..runs.len()).filter(|&i| runs[i].head.is_some()).collect();
    let len = heap.len();
    for i in (0..len / 2).rev() {
        sift_down(&mut heap, &runs, cmp, i);
    }

    while !heap.is_empty() {
        let top = heap[0];
        if let Some(record) = runs[top].head.take() {
            out.push(record)?;
        }
        runs[top].refill()?;
        if runs[top].head.is_none() {
            let last = heap.len() - 1;
            heap.swap(0, last);
            heap.pop();
        }
        if !heap.is_empty() {
            sift_down(&mut heap, &runs, cmp, 0);
        }
    }
    Ok(())
}

fn head_less<T, F>(runs: &[RunCursor<T>], cmp: &F, a: usize, b: usize) -> bool
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    match (&runs[a].head, &runs[b].head) {
        (Some(x), Some(y)) => cmp(x, y) == Ordering::Less,
        _ => false,
    }
}

fn sift_down<T, F>(heap: &mut [usize], runs: &[RunCursor<T>], cmp: &F, mut i: usize)
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    loop {
        let left = 2 * i + 1;
        let right = 2 * i + 2;
        let mut smallest = i;
        if left < heap.len() && head_less(runs, cmp, heap[left], heap[smallest]) {
            smallest = left;
        }
        if right < heap.len() && head_less(runs, cmp, heap[right], heap[smallest]) {
            smallest = right;
        }
        if smallest == i {
            return;
        }
        heap.swap(i, smallest);
        i = smallest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn drain(sequence: &Sequence<u64>) -> Vec<u64> {
        let mut reader = sequence.reader().unwrap();
        let mut out = Vec::new();
        while let Some(&v) = reader.peek() {
            out.push(v);
            reader.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_push_and_scan_in_order() {
        let mut sequence = Sequence::new();
        for v in [5u64, 1, 9, 1, 3] {
            sequence.push(v).unwrap();
        }
        assert_eq!(sequence.len(), 5);
        assert_eq!(drain(&sequence), vec![5, 1, 9, 1, 3]);
    }

    #[test]
    fn test_sort_across_spilled_runs() {
        // 64-byte tail and budget: 8 records per spill, 8 per run.
        let mut sequence = Sequence::with_write_buffer(64);
        let mut rng = StdRng::seed_from_u64(42);
        let mut expected: Vec<u64> = (0..1000).map(|_| rng.gen_range(0..500)).collect();
        for &v in &expected {
            sequence.push(v).unwrap();
        }

        sequence.sort_by(64, |a, b| a.cmp(b)).unwrap();

        expected.sort_unstable();
        assert_eq!(sequence.len(), 1000);
        assert_eq!(drain(&sequence), expected);
    }

    #[test]
    fn test_resort_under_different_comparator() {
        let mut sequence = Sequence::with_write_buffer(32);
        for v in [4u64, 2, 7, 2, 0] {
            sequence.push(v).unwrap();
        }
        sequence.sort_by(32, |a, b| b.cmp(a)).unwrap();
        assert_eq!(drain(&sequence), vec![7, 4, 2, 2, 0]);

        sequence.sort_by(32, |a, b| a.cmp(b)).unwrap();
        assert_eq!(drain(&sequence), vec![0, 2, 2, 4, 7]);
    }

    #[test]
    fn test_dedup_collapses_adjacent_only() {
        let mut sequence = Sequence::new();
        for v in [1u64, 1, 2, 2, 2, 3, 1] {
            sequence.push(v).unwrap();
        }
        sequence.dedup().unwrap();
        // The trailing 1 is not adjacent to the leading pair and survives.
        assert_eq!(drain(&sequence), vec![1, 2, 3, 1]);
    }

    #[test]
    fn test_sorted_dedup_is_strictly_ascending() {
        let mut sequence = Sequence::with_write_buffer(64);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            sequence.push(rng.gen_range(0..50)).unwrap();
        }
        sequence.sort_by(64, |a, b| a.cmp(b)).unwrap();
        sequence.dedup().unwrap();

        let values = drain(&sequence);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_empty_sequence() {
        let mut sequence: Sequence<u64> = Sequence::new();
        sequence.sort_by(1024, |a, b| a.cmp(b)).unwrap();
        sequence.dedup().unwrap();
        assert!(sequence.is_empty());
        assert!(sequence.reader().unwrap().peek().is_none());
    }
}
