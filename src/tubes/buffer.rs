/// Bytes received from a tube that no caller has consumed yet
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    data: Vec<u8>,
    buffer_fill_size: Option<usize>
}

impl Buffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get_fill_size(&self, size: Option<usize>) -> usize {
        if let Some(size) = size {
            size
        } else if let Some(size) = self.buffer_fill_size {
            size
        } else {
            4096
        }
    }

    pub fn set_fill_size(&mut self, size: Option<usize>) {
        self.buffer_fill_size = size;
    }

    pub fn add(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Put bytes back in front of whatever is buffered
    pub fn unget(&mut self, data: Vec<u8>) {
        self.data.splice(0..0, data);
    }

    pub fn get(&mut self, want: usize) -> Vec<u8> {
        if want >= self.data.len() {
            return std::mem::take(&mut self.data);
        }
        self.data.drain(0..want).collect()
    }

    /// Position of the first occurrence of `needle` in the buffered bytes
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.data.windows(needle.len()).position(|window| window == needle)
    }
}
