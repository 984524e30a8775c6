//! esp32-camera frame source.
//!
//! Requires the `espressif/esp32-camera` component with its bindings exposed
//! as `esp_idf_svc::sys::camera` (see the firmware's `Cargo.toml`).

use std::ptr::{addr_of, NonNull};

use camstream_core::{
    CameraPins, CaptureError, Frame, FrameBufferLocation, FrameSize, FrameSource, GrabMode,
    SensorConfig,
};
use esp_idf_svc::sys::{camera, esp, EspError};
use log::info;

/// Initialized camera driver.
///
/// The driver is a process-wide singleton; this handle only proves it was
/// initialized. Buffers come from the driver's `fb_count` pool, and
/// `esp_camera_fb_get` blocks until one holds a finished frame.
pub struct EspCamera {
    _initialized: (),
}

impl EspCamera {
    /// Configure and start the sensor.
    pub fn init(pins: &CameraPins, sensor: &SensorConfig) -> Result<Self, EspError> {
        let config = camera_config(pins, sensor);
        esp!(unsafe { camera::esp_camera_init(&config) })?;

        let (width, height) = sensor.frame_size.dimensions();
        info!(
            "Camera initialized: {}x{} JPEG, quality {}, {} buffers",
            width, height, sensor.jpeg_quality, sensor.fb_count
        );
        Ok(Self { _initialized: () })
    }
}

/// One driver frame buffer.
pub struct CameraFrame {
    fb: NonNull<camera::camera_fb_t>,
}

impl Frame for CameraFrame {
    fn data(&self) -> &[u8] {
        // camera_fb_t is packed on some targets; read the fields unaligned.
        unsafe {
            let fb = self.fb.as_ptr();
            let buf = addr_of!((*fb).buf).read_unaligned();
            let len = addr_of!((*fb).len).read_unaligned();
            std::slice::from_raw_parts(buf, len)
        }
    }
}

impl FrameSource for EspCamera {
    type Frame = CameraFrame;

    fn acquire(&self) -> Result<CameraFrame, CaptureError> {
        let fb = unsafe { camera::esp_camera_fb_get() };
        NonNull::new(fb)
            .map(|fb| CameraFrame { fb })
            .ok_or(CaptureError::NoFrame)
    }

    fn release(&self, frame: CameraFrame) {
        unsafe { camera::esp_camera_fb_return(frame.fb.as_ptr()) };
    }
}

fn camera_config(pins: &CameraPins, sensor: &SensorConfig) -> camera::camera_config_t {
    let mut config = camera::camera_config_t::default();

    config.pin_pwdn = pins.pwdn;
    config.pin_reset = pins.reset;
    config.pin_xclk = pins.xclk;
    config.__bindgen_anon_1.pin_sccb_sda = pins.sccb_sda;
    config.__bindgen_anon_2.pin_sccb_scl = pins.sccb_scl;
    config.pin_d0 = pins.data[0];
    config.pin_d1 = pins.data[1];
    config.pin_d2 = pins.data[2];
    config.pin_d3 = pins.data[3];
    config.pin_d4 = pins.data[4];
    config.pin_d5 = pins.data[5];
    config.pin_d6 = pins.data[6];
    config.pin_d7 = pins.data[7];
    config.pin_vsync = pins.vsync;
    config.pin_href = pins.href;
    config.pin_pclk = pins.pclk;

    // XCLK comes from LEDC timer 0 / channel 0.
    config.xclk_freq_hz = sensor.xclk_freq_hz as i32;
    config.ledc_timer = camera::ledc_timer_t_LEDC_TIMER_0;
    config.ledc_channel = camera::ledc_channel_t_LEDC_CHANNEL_0;

    config.pixel_format = camera::pixformat_t_PIXFORMAT_JPEG;
    config.frame_size = frame_size(sensor.frame_size);
    config.jpeg_quality = sensor.jpeg_quality as i32;
    config.fb_count = sensor.fb_count as usize;
    config.fb_location = match sensor.fb_location {
        FrameBufferLocation::Psram => camera::camera_fb_location_t_CAMERA_FB_IN_PSRAM,
        FrameBufferLocation::Dram => camera::camera_fb_location_t_CAMERA_FB_IN_DRAM,
    };
    config.grab_mode = match sensor.grab_mode {
        GrabMode::WhenEmpty => camera::camera_grab_mode_t_CAMERA_GRAB_WHEN_EMPTY,
        GrabMode::Latest => camera::camera_grab_mode_t_CAMERA_GRAB_LATEST,
    };

    config
}

fn frame_size(size: FrameSize) -> camera::framesize_t {
    match size {
        FrameSize::Qqvga => camera::framesize_t_FRAMESIZE_QQVGA,
        FrameSize::Qvga => camera::framesize_t_FRAMESIZE_QVGA,
        FrameSize::Cif => camera::framesize_t_FRAMESIZE_CIF,
        FrameSize::Vga => camera::framesize_t_FRAMESIZE_VGA,
        FrameSize::Svga => camera::framesize_t_FRAMESIZE_SVGA,
        FrameSize::Xga => camera::framesize_t_FRAMESIZE_XGA,
        FrameSize::Sxga => camera::framesize_t_FRAMESIZE_SXGA,
        FrameSize::Uxga => camera::framesize_t_FRAMESIZE_UXGA,
    }
}
