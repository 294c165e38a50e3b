//! Linux GPIO character device ABI (`linux/gpio.h`, uAPI v2).

use std::mem;

pub const GPIO_MAX_NAME_SIZE: usize = 32;
pub const GPIO_V2_LINES_MAX: usize = 64;
pub const GPIO_V2_LINE_NUM_ATTRS_MAX: usize = 10;

pub const GPIO_V2_LINE_FLAG_INPUT: u64 = 1 << 2;
pub const GPIO_V2_LINE_FLAG_EDGE_RISING: u64 = 1 << 4;
pub const GPIO_V2_LINE_FLAG_EDGE_FALLING: u64 = 1 << 5;

/// `_IOR(0xB4, 0x01, struct gpiochip_info)`
pub const GPIO_GET_CHIPINFO_IOCTL: u64 = ioc(IOC_READ, 0xB4, 0x01, mem::size_of::<GpioChipInfo>());
/// `_IOWR(0xB4, 0x07, struct gpio_v2_line_request)`
pub const GPIO_V2_GET_LINE_IOCTL: u64 = ioc(
    IOC_READ | IOC_WRITE,
    0xB4,
    0x07,
    mem::size_of::<GpioV2LineRequest>(),
);

const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

const fn ioc(dir: u64, kind: u64, nr: u64, size: usize) -> u64 {
    (dir << 30) | ((size as u64) << 16) | (kind << 8) | nr
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioChipInfo {
    pub name: [u8; GPIO_MAX_NAME_SIZE],
    pub label: [u8; GPIO_MAX_NAME_SIZE],
    pub lines: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioV2LineAttribute {
    pub id: u32,
    pub padding: u32,
    /// Union of `flags`, `values` and `debounce_period_us`.
    pub value: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioV2LineConfigAttribute {
    pub attr: GpioV2LineAttribute,
    pub mask: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioV2LineConfig {
    pub flags: u64,
    pub num_attrs: u32,
    pub padding: [u32; 5],
    pub attrs: [GpioV2LineConfigAttribute; GPIO_V2_LINE_NUM_ATTRS_MAX],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioV2LineRequest {
    pub offsets: [u32; GPIO_V2_LINES_MAX],
    pub consumer: [u8; GPIO_MAX_NAME_SIZE],
    pub config: GpioV2LineConfig,
    pub num_lines: u32,
    pub event_buffer_size: u32,
    pub padding: [u32; 5],
    pub fd: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioV2LineEvent {
    pub timestamp_ns: u64,
    pub id: u32,
    pub offset: u32,
    pub seqno: u32,
    pub line_seqno: u32,
    pub padding: [u32; 6],
}

const _: () = assert!(mem::size_of::<GpioChipInfo>() == 68);
const _: () = assert!(mem::size_of::<GpioV2LineConfig>() == 272);
const _: () = assert!(mem::size_of::<GpioV2LineRequest>() == 592);
const _: () = assert!(mem::size_of::<GpioV2LineEvent>() == 48);

/// Plain-old-data structs that the kernel accepts zero-filled.
pub trait Zeroed: Sized {
    fn zeroed() -> Self {
        // SAFETY: implemented only for repr(C) structs made of integers and
        // integer arrays, for which all-zero bytes are a valid value.
        unsafe { mem::zeroed() }
    }
}

impl Zeroed for GpioChipInfo {}
impl Zeroed for GpioV2LineRequest {}
impl Zeroed for GpioV2LineEvent {}

impl GpioChipInfo {
    pub fn name(&self) -> String {
        c_string(&self.name)
    }

    pub fn label(&self) -> String {
        c_string(&self.label)
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Copy `consumer` into a fixed NUL-terminated field, truncating if needed.
pub fn consumer_label(consumer: &str) -> [u8; GPIO_MAX_NAME_SIZE] {
    let mut out = [0u8; GPIO_MAX_NAME_SIZE];
    let len = consumer.len().min(GPIO_MAX_NAME_SIZE - 1);
    out[..len].copy_from_slice(&consumer.as_bytes()[..len]);
    out
}
