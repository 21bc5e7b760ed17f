use std::{io::Stdout, path::Path};

use orangecart_core::dfu::DFU_SUFFIX_LENGTH;
use pbr::{ProgressBar, Units};

/// Progress over writing one DFU image, the bitstream followed by its suffix.
/// The bar is labeled with the image file name so it can be told apart from
/// the dfu-util output that follows.
pub struct ImageWriteReporter<T> {
    pb: ProgressBar<Stdout>,
    inner: T,
}

impl<T> ImageWriteReporter<T>
where
    T: std::io::Write,
{
    pub fn new(bitstream_len: usize, image_path: &Path, inner: T) -> Self {
        let mut pb = ProgressBar::new((bitstream_len + DFU_SUFFIX_LENGTH) as u64);
        pb.set_units(Units::Bytes);
        if let Some(name) = image_path.file_name() {
            pb.message(&format!("{} ", name.to_string_lossy()));
        }

        Self { pb, inner }
    }

    /// Hands back the writer once the image is complete.
    pub fn finish(mut self) -> T {
        self.pb.finish();
        self.inner
    }
}

impl<T> std::io::Write for ImageWriteReporter<T>
where
    T: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.pb.add(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
