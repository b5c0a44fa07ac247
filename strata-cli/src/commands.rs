use crate::config::StrataConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_base::decode::{ParsedScene, SceneDecodeOptions, SceneDecoder};
use strata_base::{ResourceUuid, StrataError, StrataResult};
use strata_db::files::{validate_resource, Colorspace, TextureEncoding};
use strata_db::{LedgerRow, RemoveResourceOutcome, ResourceDatabase};
use strata_jobs::JobContexts;
use strata_pipeline::{AssetPipeline, ImportServices, ImportTextureParams, ImporterRegistryBuilder};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Lists every resource in the ledger
    List,
    /// Prints where a resource is stored
    Locate {
        uuid: ResourceUuid,
    },
    /// Imports an image file as a texture resource
    ImportTexture {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
        #[structopt(long)]
        encoding: Option<TextureEncoding>,
        #[structopt(long)]
        mips: bool,
        // Color data is sRGB unless this is set
        #[structopt(long)]
        linear: bool,
    },
    /// Removes a resource and, if nothing else uses it, its file
    Remove {
        uuid: ResourceUuid,
    },
    /// Opens every resource and validates its file
    Verify,
}

// The CLI only imports textures
struct NoSceneDecoder;

impl SceneDecoder for NoSceneDecoder {
    fn external_parse(
        &self,
        _bytes: &[u8],
        _source_dir: &Path,
        _options: &SceneDecodeOptions,
    ) -> StrataResult<ParsedScene> {
        Err(StrataError::ParseError(
            "No scene decoder is available".to_string(),
        ))
    }
}

pub fn run(
    config: &StrataConfig,
    command: &Command,
    out: &mut dyn Write,
) -> StrataResult<()> {
    let db = Arc::new(ResourceDatabase::open(&config.database_root)?);
    log::info!(
        "Opened database {:?} ({} resources)",
        db.root(),
        db.num_resources()
    );

    match command {
        Command::List => list(&db, out),
        Command::Locate { uuid } => locate(&db, uuid, out),
        Command::ImportTexture {
            file,
            encoding,
            mips,
            linear,
        } => {
            let params = ImportTextureParams {
                encoding: encoding.unwrap_or(config.import.texture_encoding),
                colorspace: if *linear {
                    Colorspace::Linear
                } else {
                    Colorspace::Srgb
                },
                generate_mips: *mips || config.import.generate_mips,
            };
            import_texture(config, db, file, params, out)
        }
        Command::Remove { uuid } => remove(&db, uuid, out),
        Command::Verify => verify(&db, out),
    }
}

fn rows(db: &ResourceDatabase) -> Vec<LedgerRow> {
    let mut rows = Vec::with_capacity(db.num_resources());
    db.for_each_row(|row| rows.push(row.clone()));
    rows
}

fn list(
    db: &ResourceDatabase,
    out: &mut dyn Write,
) -> StrataResult<()> {
    for row in rows(db) {
        writeln!(
            out,
            "{} {} {} {}+{}",
            row.uuid, row.resource_kind, row.path, row.offset_bytes, row.size_bytes
        )?;
    }
    Ok(())
}

fn locate(
    db: &ResourceDatabase,
    uuid: &ResourceUuid,
    out: &mut dyn Write,
) -> StrataResult<()> {
    let location = db.locate(uuid).ok_or(StrataError::NotFound(*uuid))?;
    writeln!(
        out,
        "{} {} {}+{}",
        db.type_of(uuid),
        db.resource_filepath(&location.path).display(),
        location.offset_bytes,
        location.size_bytes
    )?;
    Ok(())
}

fn import_texture(
    config: &StrataConfig,
    db: Arc<ResourceDatabase>,
    file: &Path,
    params: ImportTextureParams,
    out: &mut dyn Write,
) -> StrataResult<()> {
    let jobs = Arc::new(JobContexts::new(&config.jobs)?);
    let services = ImportServices::new(db, jobs.clone(), Arc::new(NoSceneDecoder));
    let importers = ImporterRegistryBuilder::default()
        .with_default_importers()
        .build();
    let pipeline = AssetPipeline::new(services, importers);

    let result = pipeline.import_asset(file, params).get_result();
    drop(pipeline);
    if let Ok(jobs) = Arc::try_unwrap(jobs) {
        jobs.finish();
    }

    writeln!(out, "{}", result?)?;
    Ok(())
}

fn remove(
    db: &ResourceDatabase,
    uuid: &ResourceUuid,
    out: &mut dyn Write,
) -> StrataResult<()> {
    match db.try_remove_resource(uuid) {
        RemoveResourceOutcome::UUIDNotFound => Err(StrataError::NotFound(*uuid)),
        outcome => {
            writeln!(out, "{} {:?}", uuid, outcome)?;
            Ok(())
        }
    }
}

fn verify(
    db: &ResourceDatabase,
    out: &mut dyn Write,
) -> StrataResult<()> {
    profiling::scope!("verify");
    let rows = rows(db);
    let mut failures = 0;
    for row in &rows {
        let result = db
            .map_resource(&row.uuid)
            .and_then(|region| validate_resource(row.resource_kind, region.bytes()));
        if let Err(e) = result {
            log::warn!("Resource {} ({}) is invalid: {}", row.uuid, row.path, e);
            writeln!(out, "{} {}: {}", row.uuid, row.path, e)?;
            failures += 1;
        }
    }

    log::info!("Verified {} resources, {} invalid", rows.len(), failures);
    if failures > 0 {
        return Err(StrataError::InvalidResourceFile(format!(
            "{} of {} resources failed verification",
            failures,
            rows.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use strata_base::{kinds, ResourcePathHint};

    fn setup() -> (tempfile::TempDir, StrataConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StrataConfig::default();
        config.database_root = dir.path().join("db");
        config.jobs.worker_threads = 2;
        (dir, config)
    }

    fn run_to_string(
        config: &StrataConfig,
        command: Command,
    ) -> StrataResult<String> {
        let mut out = Vec::new();
        run(config, &command, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn write_png(dir: &Path) -> PathBuf {
        let path = dir.join("rock.png");
        image::RgbImage::from_fn(8, 4, |x, y| image::Rgb([x as u8 * 20, y as u8 * 40, 90]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn import_then_list_locate_and_verify() {
        let (dir, config) = setup();
        let png = write_png(dir.path());

        let output = run_to_string(
            &config,
            Command::ImportTexture {
                file: png,
                encoding: Some(TextureEncoding::Raw),
                mips: true,
                linear: false,
            },
        )
        .unwrap();
        let uuid: ResourceUuid = output.trim().parse().unwrap();

        let listing = run_to_string(&config, Command::List).unwrap();
        assert_eq!(listing.lines().count(), 1);
        assert!(listing.starts_with(&uuid.to_string()));
        assert!(listing.contains("textures/rock.jtxtr"));

        let location = run_to_string(&config, Command::Locate { uuid }).unwrap();
        assert!(location.starts_with(&kinds::TEXTURE.to_string()));

        run_to_string(&config, Command::Verify).unwrap();
    }

    #[test]
    fn remove_drops_the_row() {
        let (_dir, config) = setup();
        let uuid = {
            let db = ResourceDatabase::open(&config.database_root).unwrap();
            let (uuid, region) = db
                .generate_resource(
                    kinds::MATERIAL,
                    &ResourcePathHint::new("materials", "stone", "jmatl"),
                    2,
                )
                .unwrap();
            drop(region);
            uuid
        };

        run_to_string(&config, Command::Remove { uuid }).unwrap();
        assert!(run_to_string(&config, Command::List).unwrap().is_empty());
        assert!(matches!(
            run_to_string(&config, Command::Remove { uuid }),
            Err(StrataError::NotFound(_))
        ));
    }

    #[test]
    fn verify_reports_corrupt_resources() {
        let (_dir, config) = setup();
        {
            let db = ResourceDatabase::open(&config.database_root).unwrap();
            let (_uuid, mut region) = db
                .generate_resource(
                    kinds::TEXTURE,
                    &ResourcePathHint::new("textures", "broken", "jtxtr"),
                    64,
                )
                .unwrap();
            region.as_mut().fill(7);
            region.flush().unwrap();
        }

        let mut out = Vec::new();
        let result = run(&config, &Command::Verify, &mut out);
        assert!(matches!(result, Err(StrataError::InvalidResourceFile(_))));
        assert!(String::from_utf8(out).unwrap().contains("textures/broken.jtxtr"));
    }

    #[test]
    fn locating_unknown_uuids_fails() {
        let (_dir, config) = setup();
        let result = run_to_string(
            &config,
            Command::Locate {
                uuid: ResourceUuid::generate(),
            },
        );
        assert!(matches!(result, Err(StrataError::NotFound(_))));
    }
}
