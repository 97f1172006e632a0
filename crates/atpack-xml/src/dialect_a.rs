//! Adapter for ATDF (`avr-tools-device-file`) documents.
//!
//! Devices live under `devices/device`; register layouts are declared once per
//! module kind under the document-level `modules` element and placed through
//! `peripherals/module/instance/register-group` references.

use std::collections::HashMap;

use tracing::debug;

use crate::ir::{
    Access, Family, IrAddressSpace, IrBitfield, IrDevice, IrFuse, IrInterrupt, IrModule,
    IrRegister, IrRegisterGroup, IrSegment, IrSignature, IrValue, SegmentKind,
};
use crate::reader::ElementReader;
use crate::{bit_runs, contiguous_bits, Element, ParseError};

const FUSE_MODULES: [&str; 2] = ["FUSE", "LOCKBIT"];

/// Device names in document order.
pub fn device_names(root: &Element) -> Vec<String> {
    root.children_named("devices")
        .flat_map(|devices| devices.children_named("device"))
        .filter_map(|device| device.attr("name").map(str::to_string))
        .collect()
}

/// Map an ATDF `memory-segment@type` onto a segment kind.
pub fn segment_kind(raw: Option<&str>) -> SegmentKind {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("flash") => SegmentKind::Program,
        Some("ram" | "iram" | "internal_ram") => SegmentKind::Gpr,
        Some("io" | "regs") => SegmentKind::Sfr,
        Some("eeprom") => SegmentKind::Eeprom,
        Some("fuses" | "lockbits") => SegmentKind::Config,
        Some("signatures" | "prod_signatures") => SegmentKind::DeviceId,
        Some("user_signatures") => SegmentKind::UserId,
        _ => SegmentKind::Other,
    }
}

/// Convert one `devices/device` element into IR.
pub fn parse(root: &Element, device: &str) -> Result<IrDevice, ParseError> {
    let element = root
        .children_named("devices")
        .flat_map(|devices| devices.children_named("device"))
        .find(|candidate| candidate.attr("name") == Some(device))
        .ok_or_else(|| {
            ParseError::new(device, "devices", Some(device), "device is not declared")
        })?;
    let reader = ElementReader::root(device, format!("device[{device}]"), element);

    let mut ir = IrDevice::new(device, Family::DialectA);
    ir.architecture = reader.optional("architecture").unwrap_or_default().to_string();
    ir.series = reader.optional("family").unwrap_or_default().to_string();

    parse_address_spaces(&reader, &mut ir)?;
    let placements = collect_placements(&reader)?;
    if let Some(modules) = root.child("modules") {
        let modules = ElementReader::root(device, "modules", modules);
        for module in modules.element().children_named("module") {
            parse_module(&modules.child(module), &placements, &mut ir)?;
        }
    }
    parse_interrupts(&reader, &mut ir)?;
    parse_signatures(&reader, &mut ir)?;

    debug!(
        device,
        segments = ir.segments.len(),
        modules = ir.modules.len(),
        fuses = ir.fuses.len(),
        "adapted ATDF device"
    );
    Ok(ir)
}

fn parse_address_spaces(device: &ElementReader<'_>, ir: &mut IrDevice) -> Result<(), ParseError> {
    let Some(spaces) = device.element().child("address-spaces") else {
        return Ok(());
    };
    let spaces = device.child(spaces);
    for space in spaces.element().children_named("address-space") {
        let space = spaces.child(space);
        let name = space.required("name")?.to_string();
        let id = space.optional("id").unwrap_or(&name).to_string();
        ir.spaces.push(IrAddressSpace {
            id,
            name: name.clone(),
            start: space.required_int("start")?,
            size: space.required_int("size")?,
        });

        for segment in space.element().children_named("memory-segment") {
            let segment = space.child(segment);
            let segment_name = segment.required("name")?.to_string();
            let size = segment.required_int("size")?;
            if size == 0 {
                return Err(segment.error(
                    segment.optional("size"),
                    "memory segment size must be greater than zero",
                ));
            }
            ir.segments.push(IrSegment {
                id: format!("{name}:{segment_name}"),
                name: segment_name,
                path: segment.path().to_string(),
                start: segment.required_int("start")?,
                size,
                kind: segment_kind(segment.optional("type")),
                page_size: segment.optional_int("pagesize")?,
                bank: None,
                space: Some(name.clone()),
                shadow_of: None,
            });
        }
    }
    Ok(())
}

/// Instance reference of a module register-group: placed name and base offset.
#[derive(Debug, Clone)]
struct Placement {
    name: String,
    offset: u64,
}

/// `(module name, name-in-module)` -> placements, in document order.
fn collect_placements(
    device: &ElementReader<'_>,
) -> Result<HashMap<(String, String), Vec<Placement>>, ParseError> {
    let mut placements: HashMap<(String, String), Vec<Placement>> = HashMap::new();
    let Some(peripherals) = device.element().child("peripherals") else {
        return Ok(placements);
    };
    let peripherals = device.child(peripherals);
    for module in peripherals.element().children_named("module") {
        let module = peripherals.child(module);
        let module_name = module.required("name")?.to_string();
        for instance in module.element().children_named("instance") {
            let instance = module.child(instance);
            for group in instance.element().children_named("register-group") {
                let group = instance.child(group);
                let name = group.required("name")?.to_string();
                let in_module = group.optional("name-in-module").unwrap_or(&name).to_string();
                let offset = group.optional_int("offset")?.unwrap_or(0);
                placements
                    .entry((module_name.clone(), in_module))
                    .or_default()
                    .push(Placement { name, offset });
            }
        }
    }
    Ok(placements)
}

fn parse_module(
    module: &ElementReader<'_>,
    placements: &HashMap<(String, String), Vec<Placement>>,
    ir: &mut IrDevice,
) -> Result<(), ParseError> {
    let module_name = module.required("name")?.to_string();
    let value_groups = collect_value_groups(module)?;
    let is_fuse_module = FUSE_MODULES.contains(&module_name.as_str());

    let mut groups = Vec::new();
    for group in module.element().children_named("register-group") {
        let group = module.child(group);
        let group_name = group.required("name")?.to_string();
        let default_placement = [Placement {
            name: group_name.clone(),
            offset: 0,
        }];
        let targets = placements
            .get(&(module_name.clone(), group_name.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&default_placement);

        for placement in targets {
            let mut registers = Vec::new();
            for register in group.element().children_named("register") {
                let register = group.child(register);
                registers.push(parse_register(&register, placement.offset, &value_groups)?);
            }
            if is_fuse_module {
                ir.fuses.extend(registers.into_iter().map(|register| IrFuse {
                    name: register.name,
                    caption: register.caption,
                    path: register.path,
                    address: register.offset,
                    size: register.size,
                    default_value: register.initial_value,
                    mask: register.mask,
                    fields: register.fields,
                }));
            } else {
                groups.push(IrRegisterGroup {
                    name: placement.name.clone(),
                    caption: group.optional("caption").map(str::to_string),
                    registers,
                });
            }
        }
    }

    if !is_fuse_module {
        ir.modules.push(IrModule {
            name: module_name,
            caption: module.optional("caption").map(str::to_string),
            groups,
        });
    }
    Ok(())
}

fn collect_value_groups(
    module: &ElementReader<'_>,
) -> Result<HashMap<String, Vec<IrValue>>, ParseError> {
    let mut groups = HashMap::new();
    for group in module.element().children_named("value-group") {
        let group = module.child(group);
        let mut values = Vec::new();
        for value in group.element().children_named("value") {
            let value = group.child(value);
            values.push(IrValue {
                name: value.required("name")?.to_string(),
                value: value.required_int("value")?,
                caption: value.optional("caption").map(str::to_string),
            });
        }
        groups.insert(group.required("name")?.to_string(), values);
    }
    Ok(groups)
}

fn parse_access(reader: &ElementReader<'_>) -> Result<Option<Access>, ParseError> {
    reader
        .optional("rw")
        .map(|raw| {
            Access::parse(raw).ok_or_else(|| reader.error(Some(raw), "invalid access string"))
        })
        .transpose()
}

fn parse_register(
    register: &ElementReader<'_>,
    base: u64,
    value_groups: &HashMap<String, Vec<IrValue>>,
) -> Result<IrRegister, ParseError> {
    let mut fields = Vec::new();
    for field in register.element().children_named("bitfield") {
        fields.push(parse_bitfield(&register.child(field), value_groups)?);
    }
    Ok(IrRegister {
        name: register.required("name")?.to_string(),
        caption: register.optional("caption").map(str::to_string),
        path: register.path().to_string(),
        offset: base
            .checked_add(register.required_int("offset")?)
            .ok_or_else(|| {
                register.error(register.optional("offset"), "register offset overflows")
            })?,
        size: register.optional_int("size")?.unwrap_or(1),
        access: parse_access(register)?,
        mask: register.optional_int("mask")?,
        initial_value: register.optional_int("initval")?,
        fields,
    })
}

fn parse_bitfield(
    field: &ElementReader<'_>,
    value_groups: &HashMap<String, Vec<IrValue>>,
) -> Result<IrBitfield, ParseError> {
    let raw_mask = field.required("mask")?;
    let mask = field.required_int("mask")?;
    let name = field.required("name")?.to_string();
    let caption = field.optional("caption").map(str::to_string);
    let access = parse_access(field)?;

    let values = field
        .optional("values")
        .and_then(|group| value_groups.get(group))
        .cloned()
        .unwrap_or_default();

    let mut subfields = Vec::new();
    for child in field.element().children_named("bitfield") {
        subfields.push(parse_bitfield(&field.child(child), value_groups)?);
    }

    if let Some((bit_offset, bit_width)) = contiguous_bits(mask) {
        return Ok(IrBitfield {
            name,
            caption,
            path: field.path().to_string(),
            bit_offset,
            bit_width,
            access,
            values,
            subfields,
        });
    }

    // Split masks such as 0xD0: a parent spanning all set bits with one
    // sub-field per run; nested bitfields move under the run holding them.
    let runs = bit_runs(mask);
    let (Some(&(low, _)), Some(&(top, top_width))) = (runs.first(), runs.last()) else {
        return Err(field.error(Some(raw_mask), "bitfield mask must not be zero"));
    };
    let mut pieces: Vec<IrBitfield> = runs
        .iter()
        .map(|&(bit_offset, bit_width)| IrBitfield {
            name: format!("{name}_{bit_offset}"),
            caption: caption.clone(),
            path: field.path().to_string(),
            bit_offset,
            bit_width,
            access,
            values: Vec::new(),
            subfields: Vec::new(),
        })
        .collect();
    for nested in subfields {
        let end = nested.bit_offset + nested.bit_width;
        let run = pieces
            .iter_mut()
            .find(|run| {
                nested.bit_offset >= run.bit_offset && end <= run.bit_offset + run.bit_width
            })
            .ok_or_else(|| {
                field.error(
                    Some(raw_mask),
                    format!("bitfield `{}` crosses a gap in the parent mask", nested.name),
                )
            })?;
        run.subfields.push(nested);
    }
    debug!(
        field = %field.path(),
        mask = %raw_mask,
        runs = pieces.len(),
        "split non-contiguous bitfield mask"
    );

    Ok(IrBitfield {
        name,
        caption,
        path: field.path().to_string(),
        bit_offset: low,
        bit_width: top + top_width - low,
        access,
        values,
        subfields: pieces,
    })
}

fn parse_interrupts(device: &ElementReader<'_>, ir: &mut IrDevice) -> Result<(), ParseError> {
    let Some(interrupts) = device.element().child("interrupts") else {
        return Ok(());
    };
    let interrupts = device.child(interrupts);
    for interrupt in interrupts.element().children_named("interrupt") {
        let interrupt = interrupts.child(interrupt);
        ir.interrupts.push(IrInterrupt {
            index: interrupt.required_int("index")?,
            name: interrupt.required("name")?.to_string(),
            caption: interrupt.optional("caption").map(str::to_string),
            path: interrupt.path().to_string(),
        });
    }
    Ok(())
}

fn parse_signatures(device: &ElementReader<'_>, ir: &mut IrDevice) -> Result<(), ParseError> {
    let Some(groups) = device.element().child("property-groups") else {
        return Ok(());
    };
    let groups = device.child(groups);
    let Some(signatures) = groups
        .element()
        .children_named("property-group")
        .find(|group| group.attr("name") == Some("SIGNATURES"))
    else {
        return Ok(());
    };
    let signatures = groups.child(signatures);
    for (position, property) in signatures
        .element()
        .children_named("property")
        .enumerate()
    {
        let property = signatures.child(property);
        let name = property.required("name")?.to_string();
        let address = name
            .strip_prefix("SIGNATURE")
            .and_then(|suffix| suffix.parse::<u64>().ok())
            .unwrap_or(position as u64);
        ir.signatures.push(IrSignature {
            value: property.required_int("value")?,
            name,
            address,
            mask: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_document;

    const ATTINY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<avr-tools-device-file schema-version="0.3">
  <devices>
    <device name="ATtiny13A" architecture="AVR8" family="tinyAVR">
      <address-spaces>
        <address-space endianness="little" name="prog" id="prog" start="0x0000" size="0x0400">
          <memory-segment start="0x0000" size="0x0400" type="flash" rw="RW" exec="1" name="FLASH" pagesize="0x20"/>
        </address-space>
        <address-space endianness="little" name="data" id="data" start="0x0000" size="0x00A0">
          <memory-segment external="false" type="regs" size="0x0020" start="0x0000" name="REGISTERS"/>
          <memory-segment name="MAPPED_IO" start="0x0020" type="io" size="0x0040"/>
          <memory-segment name="IRAM" start="0x0060" type="ram" size="0x0040"/>
        </address-space>
        <address-space endianness="little" name="fuses" id="fuses" start="0" size="0x0002">
          <memory-segment start="0" size="0x0002" type="fuses" rw="RW" exec="0" name="FUSES"/>
        </address-space>
      </address-spaces>
      <peripherals>
        <module name="TC0">
          <instance name="TC0" caption="Timer/Counter 0">
            <register-group name="TC0" name-in-module="TC0" offset="0x00" address-space="data" caption="Timer/Counter 0"/>
          </instance>
        </module>
        <module name="FUSE">
          <instance name="FUSE">
            <register-group name="FUSE" name-in-module="FUSE" offset="0" address-space="fuses"/>
          </instance>
        </module>
      </peripherals>
      <interrupts>
        <interrupt index="0" name="RESET" caption="External Reset"/>
        <interrupt index="3" name="TIM0_OVF" caption="Timer/Counter0 Overflow"/>
      </interrupts>
      <property-groups>
        <property-group name="SIGNATURES">
          <property name="SIGNATURE0" value="0x1e"/>
          <property name="SIGNATURE1" value="0x90"/>
          <property name="SIGNATURE2" value="0x07"/>
        </property-group>
      </property-groups>
    </device>
  </devices>
  <modules>
    <module caption="Timer/Counter, 8-bit" name="TC0">
      <register-group caption="Timer/Counter, 8-bit" name="TC0">
        <register caption="Timer/Counter0 Control Register B" name="TCCR0B" offset="0x53" size="1" mask="0xCF">
          <bitfield caption="Clock Select" mask="0x07" name="CS0" values="CLK_SEL_3BIT_EXT">
            <bitfield caption="Clock Select bit 0" mask="0x01" name="CS00"/>
            <bitfield caption="Clock Select bit 1" mask="0x02" name="CS01"/>
            <bitfield caption="Clock Select bit 2" mask="0x04" name="CS02"/>
          </bitfield>
          <bitfield caption="Force Output Compare A" mask="0x80" name="FOC0A" rw="W"/>
        </register>
        <register caption="Timer/Counter0" name="TCNT0" offset="0x52" size="1" mask="0xFF" initval="0x00"/>
      </register-group>
      <value-group caption="" name="CLK_SEL_3BIT_EXT">
        <value caption="No Clock Source (Stopped)" name="VAL_0x00" value="0x00"/>
        <value caption="Running, No Prescaling" name="VAL_0x01" value="0x01"/>
      </value-group>
    </module>
    <module caption="Fuses" name="FUSE">
      <register-group caption="Fuses" name="FUSE">
        <register caption="" name="LOW" offset="0x00" size="1" initval="0x6A">
          <bitfield caption="Select Clock Source" mask="0x03" name="CKSEL"/>
        </register>
      </register-group>
    </module>
  </modules>
</avr-tools-device-file>
"#;

    #[test]
    fn lists_devices() {
        let root = parse_document(ATTINY).unwrap();
        assert_eq!(device_names(&root), vec!["ATtiny13A".to_string()]);
    }

    #[test]
    fn adapts_memory_segments() {
        let root = parse_document(ATTINY).unwrap();
        let ir = parse(&root, "ATtiny13A").expect("adapt device");
        assert_eq!(ir.family, Family::DialectA);
        assert_eq!(ir.architecture, "AVR8");
        assert_eq!(ir.series, "tinyAVR");
        assert_eq!(ir.spaces.len(), 3);
        assert_eq!(ir.segments.len(), 5);
        let flash = &ir.segments[0];
        assert_eq!(flash.name, "FLASH");
        assert_eq!(flash.kind, SegmentKind::Program);
        assert_eq!(flash.page_size, Some(0x20));
        assert_eq!(flash.space.as_deref(), Some("prog"));
        assert!(ir.segments.iter().all(|segment| segment.shadow_of.is_none()));
        assert_eq!(ir.segments[3].kind, SegmentKind::Gpr);
    }

    #[test]
    fn adapts_registers_with_nested_subfields() {
        let root = parse_document(ATTINY).unwrap();
        let ir = parse(&root, "ATtiny13A").unwrap();
        assert_eq!(ir.modules.len(), 1);
        let tc0 = &ir.modules[0];
        assert_eq!(tc0.groups[0].name, "TC0");
        let tccr0b = &tc0.groups[0].registers[0];
        assert_eq!(tccr0b.offset, 0x53);
        assert_eq!(tccr0b.mask, Some(0xCF));
        let cs0 = &tccr0b.fields[0];
        assert_eq!((cs0.bit_offset, cs0.bit_width), (0, 3));
        assert_eq!(cs0.values.len(), 2);
        assert_eq!(cs0.subfields.len(), 3);
        assert_eq!(cs0.subfields[2].bit_offset, 2);
        assert_eq!(tccr0b.fields[1].access, Some(Access::WRITE));
        assert_eq!(
            cs0.path,
            "modules/module[TC0]/register-group[TC0]/register[TCCR0B]/bitfield[CS0]"
        );
    }

    #[test]
    fn fuses_signatures_interrupts() {
        let root = parse_document(ATTINY).unwrap();
        let ir = parse(&root, "ATtiny13A").unwrap();
        assert_eq!(ir.fuses.len(), 1);
        assert_eq!(ir.fuses[0].name, "LOW");
        assert_eq!(ir.fuses[0].default_value, Some(0x6A));
        assert_eq!(ir.interrupts.len(), 2);
        assert_eq!(ir.interrupts[1].index, 3);
        let values: Vec<_> = ir
            .signatures
            .iter()
            .map(|sig| (sig.address, sig.value))
            .collect();
        assert_eq!(values, vec![(0, 0x1e), (1, 0x90), (2, 0x07)]);
    }

    #[test]
    fn instance_offsets_are_applied() {
        let xml = ATTINY.replace(
            r#"name-in-module="TC0" offset="0x00""#,
            r#"name-in-module="TC0" offset="0x100""#,
        );
        let root = parse_document(&xml).unwrap();
        let ir = parse(&root, "ATtiny13A").unwrap();
        assert_eq!(ir.modules[0].groups[0].registers[0].offset, 0x153);
    }

    #[test]
    fn zero_mask_is_rejected() {
        let xml = ATTINY.replace(r#"mask="0x80" name="FOC0A""#, r#"mask="0x00" name="FOC0A""#);
        let root = parse_document(&xml).unwrap();
        let err = parse(&root, "ATtiny13A").unwrap_err();
        assert_eq!(err.raw_value.as_deref(), Some("0x00"));
        assert!(err.path.ends_with("bitfield[FOC0A]"));
    }

    #[test]
    fn non_contiguous_mask_is_split_into_runs() {
        let xml = ATTINY
            .replace(r#"mask="0xCF">"#, r#"mask="0xFF">"#)
            .replace(
                r#"<bitfield caption="Force Output Compare A" mask="0x80" name="FOC0A" rw="W"/>"#,
                r#"<bitfield caption="Reference Selection" mask="0xD0" name="REFS" values="CLK_SEL_3BIT_EXT">
            <bitfield caption="Reference bit 2" mask="0x10" name="REFS2"/>
          </bitfield>"#,
            );
        let root = parse_document(&xml).unwrap();
        let ir = parse(&root, "ATtiny13A").expect("device survives a split mask");
        let refs = &ir.modules[0].groups[0].registers[0].fields[1];
        assert_eq!(refs.name, "REFS");
        assert_eq!((refs.bit_offset, refs.bit_width), (4, 4));
        assert_eq!(refs.values.len(), 2);
        let runs: Vec<_> = refs
            .subfields
            .iter()
            .map(|run| (run.name.as_str(), run.bit_offset, run.bit_width))
            .collect();
        assert_eq!(runs, vec![("REFS_4", 4, 1), ("REFS_6", 6, 2)]);
        assert_eq!(refs.subfields[0].subfields[0].name, "REFS2");
        assert!(refs.subfields[1].subfields.is_empty());
    }

    #[test]
    fn nested_field_across_a_mask_gap_is_rejected() {
        let xml = ATTINY.replace(
            r#"<bitfield caption="Force Output Compare A" mask="0x80" name="FOC0A" rw="W"/>"#,
            r#"<bitfield mask="0xD0" name="REFS"><bitfield mask="0x30" name="WIDE"/></bitfield>"#,
        );
        let root = parse_document(&xml).unwrap();
        let err = parse(&root, "ATtiny13A").unwrap_err();
        assert_eq!(err.raw_value.as_deref(), Some("0xD0"));
        assert!(err.reason.contains("WIDE"));
    }

    #[test]
    fn overflowing_register_offset_is_an_error() {
        let xml = ATTINY.replace(
            r#"name-in-module="TC0" offset="0x00""#,
            r#"name-in-module="TC0" offset="0xFFFFFFFFFFFFFFF0""#,
        );
        let root = parse_document(&xml).unwrap();
        let err = parse(&root, "ATtiny13A").unwrap_err();
        assert_eq!(err.device, "ATtiny13A");
        assert_eq!(err.reason, "register offset overflows");
        assert!(err.path.ends_with("register[TCCR0B]"));
        assert_eq!(err.raw_value.as_deref(), Some("0x53"));
    }

    #[test]
    fn bad_segment_address_is_rejected() {
        let xml = ATTINY.replace(r#"name="IRAM" start="0x0060""#, r#"name="IRAM" start="0x00G0""#);
        let root = parse_document(&xml).unwrap();
        let err = parse(&root, "ATtiny13A").unwrap_err();
        assert_eq!(err.device, "ATtiny13A");
        assert_eq!(err.raw_value.as_deref(), Some("0x00G0"));
        assert!(err.path.contains("memory-segment[IRAM]"));
    }

    #[test]
    fn unknown_device_is_an_error() {
        let root = parse_document(ATTINY).unwrap();
        assert!(parse(&root, "ATmega328P").is_err());
    }
}
