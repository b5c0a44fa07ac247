use crate::resource_writer::{sanitize_name, write_resource};
use crate::{ImportServices, ImportTextureParams};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageBuffer};
use std::path::{Path, PathBuf};
use strata_base::decode::DecodedImage;
use strata_base::{kinds, ResourcePathHint, ResourceUuid, StrataError, StrataResult};
use strata_db::files::{MipSpec, TextureEncoding, TextureFile, TextureFileArgs, MAX_MIPS};
use strata_jobs::{until_all_succeed, ExecutionContext, Job};

pub(crate) struct EncodedMip {
    width: u16,
    height: u16,
    encoding: TextureEncoding,
    bytes: Vec<u8>,
}

pub(crate) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Imports one image file as a texture resource
pub fn import_texture(
    services: &ImportServices,
    path: PathBuf,
    params: ImportTextureParams,
) -> Job<ResourceUuid> {
    let job_services = services.clone();
    services
        .jobs
        .thread_pool
        .spawn(format!("Import texture {:?}", path), async move {
            import_texture_file(&job_services, &path, params).await
        })
}

pub(crate) async fn import_texture_file(
    services: &ImportServices,
    path: &Path,
    params: ImportTextureParams,
) -> StrataResult<ResourceUuid> {
    profiling::scope!("import_texture_file");
    let bytes = std::fs::read(path)?;
    let image = services.image_decoder.external_parse(&bytes)?;
    log::debug!(
        "Decoded texture {:?} ({}x{}, {} channels)",
        path,
        image.width,
        image.height,
        image.num_channels
    );

    let uuid = write_texture(services, &file_stem(path), image, params).await?;
    log::info!("Imported texture {:?} as {}", path, uuid);
    Ok(uuid)
}

/// Encodes the image (and its MIP chain) into a new texture resource
pub(crate) async fn write_texture(
    services: &ImportServices,
    name: &str,
    image: DecodedImage,
    params: ImportTextureParams,
) -> StrataResult<ResourceUuid> {
    if params.encoding == TextureEncoding::Bc7 {
        return Err(StrataError::UnsupportedEncoding(
            "BC7 encoding is not available".into(),
        ));
    }

    let num_channels = image.num_channels;
    let mips = if params.generate_mips {
        generate_mip_chain(image)?
    } else {
        vec![image]
    };

    let encode_jobs: Vec<Job<EncodedMip>> = mips
        .into_iter()
        .enumerate()
        .map(|(mip_index, mip)| {
            services.jobs.thread_pool.spawn(
                format!("Encode {} MIP {}", name, mip_index),
                async move { encode_mip(mip, params.encoding) },
            )
        })
        .collect();
    let encoded = until_all_succeed(encode_jobs).await?;

    let args = TextureFileArgs {
        num_channels,
        colorspace: params.colorspace,
        mips: encoded
            .iter()
            .map(|mip| MipSpec {
                width: mip.width,
                height: mip.height,
                encoding: mip.encoding,
                size_bytes: mip.bytes.len() as u32,
            })
            .collect(),
    };

    let hint = ResourcePathHint::new("textures", sanitize_name(name), "jtxtr");
    write_resource(
        &services.db,
        kinds::TEXTURE,
        &hint,
        TextureFile::<Vec<u8>>::required_size(&args),
        |uuid, region| {
            let mut file = TextureFile::create_in(region, uuid, &args)?;
            for (mip_index, mip) in encoded.iter().enumerate() {
                file.mip_bytes_mut(mip_index).copy_from_slice(&mip.bytes);
            }
            Ok(file.into_inner())
        },
    )
}

fn to_dynamic_image(image: DecodedImage) -> StrataResult<DynamicImage> {
    let (width, height) = (image.width, image.height);
    let too_small = || {
        StrataError::StringError(format!(
            "Image pixel buffer does not match {}x{}",
            width, height
        ))
    };

    Ok(match image.num_channels {
        1 => DynamicImage::ImageLuma8(
            ImageBuffer::from_raw(width, height, image.pixels).ok_or_else(too_small)?,
        ),
        2 => DynamicImage::ImageLumaA8(
            ImageBuffer::from_raw(width, height, image.pixels).ok_or_else(too_small)?,
        ),
        3 => DynamicImage::ImageRgb8(
            ImageBuffer::from_raw(width, height, image.pixels).ok_or_else(too_small)?,
        ),
        4 => DynamicImage::ImageRgba8(
            ImageBuffer::from_raw(width, height, image.pixels).ok_or_else(too_small)?,
        ),
        other => {
            return Err(StrataError::StringError(format!(
                "Images with {} channels are not supported",
                other
            )))
        }
    })
}

/// Full resolution image followed by successively halved images down to 1x1, at most 16 levels
pub(crate) fn generate_mip_chain(image: DecodedImage) -> StrataResult<Vec<DecodedImage>> {
    profiling::scope!("generate_mip_chain");
    let num_channels = image.num_channels;
    let (mut width, mut height) = (image.width, image.height);
    let source = to_dynamic_image(image.clone())?;

    let mut mips = vec![image];
    while (width > 1 || height > 1) && mips.len() < MAX_MIPS {
        width = (width / 2).max(1);
        height = (height / 2).max(1);
        let resized = source.resize_exact(width, height, FilterType::Triangle);
        mips.push(DecodedImage {
            width,
            height,
            num_channels,
            pixels: resized.to_bytes(),
        });
    }

    Ok(mips)
}

fn encode_mip(
    mip: DecodedImage,
    encoding: TextureEncoding,
) -> StrataResult<EncodedMip> {
    profiling::scope!("encode_mip");
    if mip.width > u16::MAX as u32 || mip.height > u16::MAX as u32 {
        return Err(StrataError::StringError(format!(
            "{}x{} is too large for a texture",
            mip.width, mip.height
        )));
    }

    let bytes = match encoding {
        TextureEncoding::Raw => mip.pixels,
        TextureEncoding::Png => {
            let color_type = match mip.num_channels {
                1 => ColorType::L8,
                2 => ColorType::La8,
                3 => ColorType::Rgb8,
                _ => ColorType::Rgba8,
            };
            let mut png = Vec::new();
            image::png::PngEncoder::new(&mut png).encode(
                &mip.pixels,
                mip.width,
                mip.height,
                color_type,
            )?;
            png
        }
        TextureEncoding::Bc7 => {
            return Err(StrataError::UnsupportedEncoding(
                "BC7 encoding is not available".into(),
            ))
        }
    };

    Ok(EncodedMip {
        width: mip.width as u16,
        height: mip.height as u16,
        encoding,
        bytes,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn checkerboard(
        width: u32,
        height: u32,
    ) -> DecodedImage {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let value = if (x + y) % 2 == 0 { 255 } else { 0 };
                pixels.extend_from_slice(&[value, value, value]);
            }
        }
        DecodedImage {
            width,
            height,
            num_channels: 3,
            pixels,
        }
    }

    #[test]
    fn mip_chain_halves_to_one() {
        let mips = generate_mip_chain(checkerboard(8, 2)).unwrap();
        let sizes: Vec<_> = mips.iter().map(|mip| (mip.width, mip.height)).collect();
        assert_eq!(sizes, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        for mip in &mips {
            assert_eq!(mip.pixels.len(), (mip.width * mip.height * 3) as usize);
        }
    }

    #[test]
    fn mip_chain_is_capped() {
        let image = DecodedImage {
            width: 1 << 17,
            height: 1,
            num_channels: 1,
            pixels: vec![0; 1 << 17],
        };
        assert_eq!(generate_mip_chain(image).unwrap().len(), MAX_MIPS);
    }

    #[test]
    fn png_mips_decode_back() {
        let mip = checkerboard(4, 4);
        let pixels = mip.pixels.clone();
        let encoded = encode_mip(mip, TextureEncoding::Png).unwrap();
        assert_eq!(encoded.encoding, TextureEncoding::Png);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap().into_rgb8();
        assert_eq!(decoded.into_raw(), pixels);
    }

    #[test]
    fn bc7_is_unsupported() {
        assert!(matches!(
            encode_mip(checkerboard(1, 1), TextureEncoding::Bc7),
            Err(StrataError::UnsupportedEncoding(_))
        ));
    }
}
