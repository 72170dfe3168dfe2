// THEORY:
// The `Pixel` module is the most fundamental unit of the vision system. It is a
// "dumb" data container for a single RGBA pixel plus the two brightness lenses the
// higher layers need. It knows nothing about neighbors in space or time.
//
// Key architectural principles:
// 1.  **Two luminance lenses**: The matcher needs a precise, linear-weighted
//     luminance (Rec. 709 weights, `0.2126R + 0.7152G + 0.0722B`) because NCC scores
//     are sensitive to quantization. The bite detector only needs a cheap 8-bit
//     luma (`(77R + 150G + 29B) >> 8`) because it thresholds absolute differences.
// 2.  **Masking lives here**: A pixel with zero alpha is "masked". Templates use it
//     to exclude background; frames treat it as black.
// 3.  **Copy semantics**: A pixel is four bytes. It is passed by value everywhere.

pub mod pixel {
    pub type Byte = u8;
    pub type Channel = Byte;
    pub type Luminance = f64;
    pub type Luma = u8;

    pub const CHANNELS: usize = 4;

    const LUMA_RED: f64 = 0.2126;
    const LUMA_GREEN: f64 = 0.7152;
    const LUMA_BLUE: f64 = 0.0722;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255). Zero means masked.
        pub alpha: Channel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Pixel {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// An opaque gray pixel, handy for synthetic frames.
        pub fn gray(level: Channel) -> Self {
            Pixel::new(level, level, level, 255)
        }

        /// Builds a pixel from the first four bytes of an RGBA slice.
        /// Returns `None` when fewer than four bytes are available.
        #[inline]
        pub fn from_rgba(bytes: &[Byte]) -> Option<Self> {
            match bytes {
                [r, g, b, a, ..] => Some(Pixel::new(*r, *g, *b, *a)),
                _ => None,
            }
        }

        #[inline]
        pub fn is_masked(&self) -> bool {
            self.alpha == 0
        }

        /// Rec. 709 luminance in the 0.0..=255.0 range. Masked pixels read as 0.
        #[inline]
        pub fn luminance(&self) -> Luminance {
            if self.is_masked() {
                return 0.0;
            }
            LUMA_RED * self.red as f64 + LUMA_GREEN * self.green as f64 + LUMA_BLUE * self.blue as f64
        }

        /// Integer approximation of luma, ignoring alpha.
        #[inline]
        pub fn luma8(&self) -> Luma {
            ((77 * self.red as u32 + 150 * self.green as u32 + 29 * self.blue as u32) >> 8) as Luma
        }
    }

    impl From<[Byte; CHANNELS]> for Pixel {
        fn from(bytes: [Byte; CHANNELS]) -> Self {
            Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3])
        }
    }

    impl From<Pixel> for [Byte; CHANNELS] {
        fn from(pixel: Pixel) -> Self {
            [pixel.red, pixel.green, pixel.blue, pixel.alpha]
        }
    }
}
