pub mod png_codec_image;
