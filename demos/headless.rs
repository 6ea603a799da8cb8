use gosub_surface::device::{Device, DeviceId, DeviceRegistry, DriverTable};
use gosub_surface::platform::memory::MemoryPlatform;
use gosub_surface::platform::ChannelMasks;
use gosub_surface::render::{Color, Context, SoftwarePipeline};
use gosub_surface::surface::{DcBackend, SurfaceContext};
use gosub_surface::{RectInt, SurfaceConfig};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Configuration can be loaded from JSON; missing fields keep their defaults.
    let config = SurfaceConfig::from_json(r#"{ "max_damage_rects": 16 }"#)?;

    // Register the (pretend) graphics device in the process-wide registry.
    let registry = DeviceRegistry::global();
    registry.init();
    let drivers = DriverTable::builtin();
    let device = registry.acquire(DeviceId(226), |id| {
        let driver = drivers.lookup(0x8086, 0x2a42).map(|e| e.driver.as_str()).unwrap_or("none");
        Ok(Device::new(id, 0x8086, 0x2a42, driver))
    })?;
    log::info!("using device {} ({})", device.id, device.name);

    // A headless platform with one window of 64x48 pixels. Window pixels are not addressable,
    // so drawing goes through a fallback surface.
    let platform = Arc::new(MemoryPlatform::new());
    let window = platform.create_window_dc(64, 48, 32, ChannelMasks::new(0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0));

    let ctx = SurfaceContext::new(platform.clone())
        .with_config(config)
        .with_device(device);
    let backend = DcBackend::new(ctx);
    let mut surface = backend.create_surface(window)?;

    {
        let mut cr = Context::new(surface.as_mut(), &SoftwarePipeline);
        cr.set_source_color(Color::from_u8(32, 32, 32, 255));
        cr.paint()?;

        cr.set_source_color(Color::from_u8(200, 40, 40, 255));
        cr.rectangle(8.0, 8.0, 20.0, 12.0);
        cr.fill()?;

        cr.clip_rect(RectInt::new(30, 20, 30, 20));
        cr.set_source_color(Color::new(0.2, 0.4, 1.0, 0.5));
        cr.paint()?;
        cr.flush()?;
    }

    let stats = platform.stats();
    log::info!(
        "{} block copies, {} allocations, {} releases",
        stats.block_copies.len(),
        stats.allocations,
        stats.releases
    );

    // Snapshot the window through a fresh mapping.
    let image = surface.map_to_image(None)?;
    let path = std::env::temp_dir().join("gosub-surface-headless.png");
    image.write_png(std::fs::File::create(&path)?)?;
    surface.unmap_image(image)?;
    println!("wrote {}", path.display());

    surface.finish()?;
    drop(surface);
    registry.shutdown();
    Ok(())
}
